//! Software timer dispatcher: one worker thread per timer, driven by a
//! control condition the same way the mutex/semaphore/queue primitives are,
//! plus a deadline the worker times its wait against.
//!
//! The worker loop below is a direct transcription of the five-step
//! protocol this module is grounded on: wait until either the period
//! elapses or a control signal arrives; handle delete/stop/reset; on
//! genuine expiry, fire the callback outside the lock and reschedule.

use abi::{Handle, Status};

use crate::backend::{Lock, Signal};
use crate::registry::Pool;
use crate::time::Timestamp;

pub type TimerCallback = fn(usize);

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

struct TimerControl {
    active: bool,
    delete_pending: bool,
    stop_requested: bool,
    reset_requested: bool,
    period_ms: u32,
    mode: TimerMode,
    deadline: Option<Timestamp>,
    callback: TimerCallback,
    arg: usize,
    worker: Option<std::thread::ThreadId>,
}

pub struct Timer {
    control: Lock<TimerControl>,
    control_signal: Signal,
    join: Lock<Option<crate::backend::JoinHandle>>,
}

static TIMERS: std::sync::OnceLock<Pool<Timer, { abi::defaults::TIMERS }>> =
    std::sync::OnceLock::new();

fn timers() -> &'static Pool<Timer, { abi::defaults::TIMERS }> {
    TIMERS.get_or_init(Pool::empty)
}

ringbuf::ringbuf!(TIMER_EVENTS, TimerEvent, 32, TimerEvent::None);

#[derive(Copy, Clone, PartialEq)]
enum TimerEvent {
    None,
    Created(Handle),
    Started(Handle),
    Stopped(Handle),
    Fired(Handle),
    SelfDeleteRejected(Handle),
    Deleted(Handle),
}

pub fn create(period_ms: u32, mode: TimerMode, callback: TimerCallback, arg: usize) -> Result<Handle, Status> {
    if period_ms == 0 {
        return Err(Status::InvalidParam);
    }
    let timer = Timer {
        control: Lock::new(TimerControl {
            active: false,
            delete_pending: false,
            stop_requested: false,
            reset_requested: false,
            period_ms,
            mode,
            deadline: None,
            callback,
            arg,
            worker: None,
        }),
        control_signal: Signal::new(),
        join: Lock::new(None),
    };
    let handle = timers().insert(timer).ok_or(Status::NoMemory)?;
    let spawned = crate::backend::spawn(
        "osal-timer",
        None,
        move || worker_loop(handle),
    );
    match spawned {
        Ok(join_handle) => {
            let _ = timers().with(handle, |t| {
                *t.join.lock() = Some(join_handle);
            });
            ringbuf::ringbuf_entry!(TIMER_EVENTS, TimerEvent::Created(handle));
            Ok(handle)
        }
        Err(()) => {
            let _ = timers().remove(handle);
            Err(Status::NoMemory)
        }
    }
}

fn worker_loop(handle: Handle) {
    let id = std::thread::current().id();
    let entered = timers().with(handle, |t| {
        t.control.lock().worker = Some(id);
    });
    if entered.is_err() {
        return;
    }
    loop {
        let should_continue = timers().with(handle, |t| {
            let mut guard = t.control.lock();
            loop {
                if guard.delete_pending {
                    return false;
                }
                if guard.stop_requested {
                    guard.stop_requested = false;
                    guard.active = false;
                    let (g, _) = t.control_signal.wait_timeout(guard, None);
                    guard = g;
                    continue;
                }
                if guard.reset_requested {
                    guard.reset_requested = false;
                    guard.active = true;
                    let now = crate::backend::monotonic_now();
                    guard.deadline = now.checked_add_ms(guard.period_ms);
                    continue;
                }
                if !guard.active {
                    let (g, _) = t.control_signal.wait_timeout(guard, None);
                    guard = g;
                    continue;
                }
                let deadline = guard.deadline;
                let (g, timed_out) = t.control_signal.wait_timeout(guard, deadline);
                guard = g;
                if !timed_out {
                    continue;
                }
                if !guard.active {
                    continue;
                }
                let callback = guard.callback;
                let arg = guard.arg;
                if guard.mode == TimerMode::OneShot {
                    guard.active = false;
                } else {
                    let now = crate::backend::monotonic_now();
                    guard.deadline = now.checked_add_ms(guard.period_ms);
                }
                drop(guard);
                ringbuf::ringbuf_entry!(TIMER_EVENTS, TimerEvent::Fired(handle));
                callback(arg);
                return true;
            }
        });
        match should_continue {
            Ok(true) => continue,
            Ok(false) => return,
            Err(_) => return,
        }
    }
}

pub fn start(handle: Handle) -> Result<(), Status> {
    timers().with(handle, |t| {
        let mut guard = t.control.lock();
        guard.active = true;
        guard.reset_requested = true;
        drop(guard);
        t.control_signal.notify_all();
        ringbuf::ringbuf_entry!(TIMER_EVENTS, TimerEvent::Started(handle));
    })
}

pub fn start_from_isr(handle: Handle) -> Result<(), Status> {
    start(handle)
}

pub fn stop(handle: Handle) -> Result<(), Status> {
    timers().with(handle, |t| {
        let mut guard = t.control.lock();
        guard.active = false;
        guard.stop_requested = true;
        drop(guard);
        t.control_signal.notify_all();
        ringbuf::ringbuf_entry!(TIMER_EVENTS, TimerEvent::Stopped(handle));
    })
}

pub fn stop_from_isr(handle: Handle) -> Result<(), Status> {
    stop(handle)
}

pub fn reset(handle: Handle) -> Result<(), Status> {
    timers().with(handle, |t| {
        let mut guard = t.control.lock();
        guard.active = true;
        guard.reset_requested = true;
        drop(guard);
        t.control_signal.notify_all();
    })
}

pub fn reset_from_isr(handle: Handle) -> Result<(), Status> {
    reset(handle)
}

pub fn set_period(handle: Handle, period_ms: u32) -> Result<(), Status> {
    if period_ms == 0 {
        return Err(Status::InvalidParam);
    }
    timers().with(handle, |t| {
        let mut guard = t.control.lock();
        guard.period_ms = period_ms;
        if guard.active {
            guard.reset_requested = true;
        }
        drop(guard);
        t.control_signal.notify_all();
    })
}

pub fn is_active(handle: Handle) -> Result<bool, Status> {
    timers().with(handle, |t| t.control.lock().active)
}

/// Deleting a timer from inside its own callback would require the worker
/// thread to join itself, which deadlocks; detected here and rejected with
/// `Status::Error` rather than left undefined. The timer is left
/// delete-pending so the worker exits once the callback returns, but the
/// pool slot is not reclaimed by this call -- a later `delete` from outside
/// the callback is required to actually join and free it.
pub fn delete(handle: Handle) -> Result<(), Status> {
    let self_delete = timers().with(handle, |t| {
        let mut guard = t.control.lock();
        let calling_from_worker = guard.worker == Some(std::thread::current().id());
        guard.delete_pending = true;
        drop(guard);
        t.control_signal.notify_all();
        calling_from_worker
    })?;
    if self_delete {
        ringbuf::ringbuf_entry!(TIMER_EVENTS, TimerEvent::SelfDeleteRejected(handle));
        return Err(Status::Error);
    }
    let join_handle = timers().with(handle, |t| t.join.lock().take())?;
    if let Some(j) = join_handle {
        j.join();
    }
    timers().remove(handle).map(|_| {
        ringbuf::ringbuf_entry!(TIMER_EVENTS, TimerEvent::Deleted(handle));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn increment(_arg: usize) {
        COUNTER.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn periodic_timer_fires_s5() {
        COUNTER.store(0, Ordering::SeqCst);
        let h = create(50, TimerMode::Periodic, increment, 0).unwrap();
        start(h).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(400));
        stop(h).unwrap();
        let count = COUNTER.load(Ordering::SeqCst);
        assert!(count >= 6 && count <= 10, "count was {count}");
        delete(h).unwrap();
    }

    #[test]
    fn one_shot_fires_once() {
        COUNTER.store(0, Ordering::SeqCst);
        let h = create(20, TimerMode::OneShot, increment, 0).unwrap();
        start(h).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
        assert!(!is_active(h).unwrap());
        delete(h).unwrap();
    }

    #[test]
    fn zero_period_is_invalid() {
        assert_eq!(
            create(0, TimerMode::OneShot, increment, 0).map(|_| ()),
            Err(Status::InvalidParam)
        );
    }

    #[test]
    fn stop_prevents_further_fires() {
        COUNTER.store(0, Ordering::SeqCst);
        let h = create(20, TimerMode::Periodic, increment, 0).unwrap();
        start(h).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        stop(h).unwrap();
        let after_stop = COUNTER.load(Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(COUNTER.load(Ordering::SeqCst), after_stop);
        delete(h).unwrap();
    }
}
