//! Recursive, owner-aware mutex.
//!
//! Ownership is tracked explicitly in the control block rather than
//! delegated entirely to the substrate lock: the cooperative backend has no
//! underlying recursive primitive to delegate to, so both backends enforce
//! recursion and ownership at this layer, the way the kernel's own
//! `Task::post`/`update_mask` keep scheduling state in plain struct fields
//! rather than relying on a borrowed lock to do bookkeeping for them.

use abi::{Handle, Status};

use crate::backend::{Lock, Signal};
use crate::registry::Pool;
use crate::time::Timeout;

struct MutexControl {
    locked: bool,
    owner: Option<Handle>,
    lock_count: u32,
}

pub struct Mutex {
    control: Lock<MutexControl>,
    not_locked: Signal,
}

static MUTEXES: std::sync::OnceLock<Pool<Mutex, { abi::defaults::MUTEXES }>> =
    std::sync::OnceLock::new();

fn mutexes() -> &'static Pool<Mutex, { abi::defaults::MUTEXES }> {
    MUTEXES.get_or_init(Pool::empty)
}

ringbuf::ringbuf!(MUTEX_EVENTS, MutexEvent, 32, MutexEvent::None);

#[derive(Copy, Clone, PartialEq)]
enum MutexEvent {
    None,
    Created(Handle),
    Locked(Handle),
    Contended(Handle),
    Unlocked(Handle),
    Deleted(Handle),
}

pub fn create() -> Result<Handle, Status> {
    let mutex = Mutex {
        control: Lock::new(MutexControl {
            locked: false,
            owner: None,
            lock_count: 0,
        }),
        not_locked: Signal::new(),
    };
    match mutexes().insert(mutex) {
        Some(handle) => {
            ringbuf::ringbuf_entry!(MUTEX_EVENTS, MutexEvent::Created(handle));
            Ok(handle)
        }
        None => Err(Status::NoMemory),
    }
}

pub fn delete(handle: Handle) -> Result<(), Status> {
    mutexes().remove(handle).map(|_| {
        ringbuf::ringbuf_entry!(MUTEX_EVENTS, MutexEvent::Deleted(handle));
    })
}

fn current() -> Option<Handle> {
    crate::backend::current_task()
}

pub fn lock(handle: Handle, timeout_ms: u32) -> Result<(), Status> {
    let caller = current();
    let timeout = Timeout::from(timeout_ms);
    mutexes().with(handle, |m| {
        let mut guard = m.control.lock();
        loop {
            if !guard.locked {
                guard.locked = true;
                guard.owner = caller;
                guard.lock_count = 1;
                ringbuf::ringbuf_entry!(MUTEX_EVENTS, MutexEvent::Locked(handle));
                return Ok(());
            }
            if guard.owner == caller && caller.is_some() {
                guard.lock_count += 1;
                return Ok(());
            }
            if timeout.is_no_wait() {
                return Err(Status::Timeout);
            }
            ringbuf::ringbuf_entry!(MUTEX_EVENTS, MutexEvent::Contended(handle));
            let now = crate::backend::monotonic_now();
            let deadline = timeout.deadline_from(now);
            let (new_guard, timed_out) = m.not_locked.wait_timeout(guard, deadline);
            guard = new_guard;
            if timed_out && guard.locked && guard.owner != caller {
                return Err(Status::Timeout);
            }
        }
    })?
}

pub fn unlock(handle: Handle) -> Result<(), Status> {
    let caller = current();
    mutexes().with(handle, |m| {
        let mut guard = m.control.lock();
        if !guard.locked {
            return Err(Status::Error);
        }
        if guard.owner != caller {
            return Err(Status::Error);
        }
        guard.lock_count -= 1;
        if guard.lock_count == 0 {
            guard.locked = false;
            guard.owner = None;
            drop(guard);
            m.not_locked.notify_one();
        }
        ringbuf::ringbuf_entry!(MUTEX_EVENTS, MutexEvent::Unlocked(handle));
        Ok(())
    })?
}

/// Snapshot for tests: whether `handle` is currently locked and by whom.
#[cfg(test)]
pub fn debug_state(handle: Handle) -> Result<(bool, Option<Handle>, u32), Status> {
    mutexes().with(handle, |m| {
        let guard = m.control.lock();
        (guard.locked, guard.owner, guard.lock_count)
    })
}
