//! Counting semaphore, capped at a configured maximum. Binary semaphores
//! are the `max = 1` special case, exposed as a convenience constructor.

use abi::{Handle, Status};

use crate::backend::{Lock, Signal};
use crate::registry::Pool;
use crate::time::Timeout;

struct SemControl {
    count: u32,
    max: u32,
}

pub struct Semaphore {
    control: Lock<SemControl>,
    available: Signal,
}

static SEMAPHORES: std::sync::OnceLock<Pool<Semaphore, { abi::defaults::SEMAPHORES }>> =
    std::sync::OnceLock::new();

fn semaphores() -> &'static Pool<Semaphore, { abi::defaults::SEMAPHORES }> {
    SEMAPHORES.get_or_init(Pool::empty)
}

ringbuf::ringbuf!(SEM_EVENTS, SemEvent, 32, SemEvent::None);

#[derive(Copy, Clone, PartialEq)]
enum SemEvent {
    None,
    Created(Handle),
    Given(Handle),
    GivenDiscarded(Handle),
    Taken(Handle),
    Deleted(Handle),
}

pub fn create(initial: u32, max: u32) -> Result<Handle, Status> {
    if initial > max {
        return Err(Status::InvalidParam);
    }
    let sem = Semaphore {
        control: Lock::new(SemControl { count: initial, max }),
        available: Signal::new(),
    };
    match semaphores().insert(sem) {
        Some(handle) => {
            ringbuf::ringbuf_entry!(SEM_EVENTS, SemEvent::Created(handle));
            Ok(handle)
        }
        None => Err(Status::NoMemory),
    }
}

pub fn create_binary(initial_set: bool) -> Result<Handle, Status> {
    create(if initial_set { 1 } else { 0 }, 1)
}

pub fn create_counting(initial: u32, max: u32) -> Result<Handle, Status> {
    create(initial, max)
}

pub fn delete(handle: Handle) -> Result<(), Status> {
    semaphores().remove(handle).map(|_| {
        ringbuf::ringbuf_entry!(SEM_EVENTS, SemEvent::Deleted(handle));
    })
}

pub fn take(handle: Handle, timeout_ms: u32) -> Result<(), Status> {
    let timeout = Timeout::from(timeout_ms);
    semaphores().with(handle, |s| {
        let mut guard = s.control.lock();
        loop {
            if guard.count > 0 {
                guard.count -= 1;
                ringbuf::ringbuf_entry!(SEM_EVENTS, SemEvent::Taken(handle));
                return Ok(());
            }
            if timeout.is_no_wait() {
                return Err(Status::Timeout);
            }
            let now = crate::backend::monotonic_now();
            let deadline = timeout.deadline_from(now);
            let (new_guard, timed_out) = s.available.wait_timeout(guard, deadline);
            guard = new_guard;
            if timed_out && guard.count == 0 {
                return Err(Status::Timeout);
            }
        }
    })?
}

pub fn give(handle: Handle) -> Result<(), Status> {
    semaphores().with(handle, |s| {
        let mut guard = s.control.lock();
        if guard.count < guard.max {
            guard.count += 1;
            drop(guard);
            s.available.notify_one();
            ringbuf::ringbuf_entry!(SEM_EVENTS, SemEvent::Given(handle));
        } else {
            ringbuf::ringbuf_entry!(SEM_EVENTS, SemEvent::GivenDiscarded(handle));
        }
        Ok(())
    })?
}

/// Identical to `give` on all backends: host substrates have no ISR
/// context, and the lock taken here is never held across an interrupt
/// boundary, so there is nothing for an ISR variant to do differently.
pub fn give_from_isr(handle: Handle) -> Result<(), Status> {
    give(handle)
}

#[cfg(test)]
pub fn debug_count(handle: Handle) -> Result<u32, Status> {
    semaphores().with(handle, |s| s.control.lock().count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_initial_above_max() {
        assert_eq!(create(5, 2), Err(Status::InvalidParam));
    }

    #[test]
    fn counting_semaphore_s4() {
        let h = create_counting(0, 20).unwrap();
        for _ in 0..10 {
            give(h).unwrap();
        }
        for _ in 0..10 {
            take(h, abi::NO_WAIT).unwrap();
        }
        assert_eq!(take(h, abi::NO_WAIT), Err(Status::Timeout));
        delete(h).unwrap();
    }

    #[test]
    fn give_saturates_at_max() {
        let h = create(0, 1).unwrap();
        give(h).unwrap();
        give(h).unwrap();
        assert_eq!(debug_count(h).unwrap(), 1);
        delete(h).unwrap();
    }

    #[test]
    fn deleted_semaphore_rejects_ops() {
        let h = create(1, 1).unwrap();
        delete(h).unwrap();
        assert_eq!(delete(h), Err(Status::InvalidParam));
        assert_eq!(take(h, abi::NO_WAIT), Err(Status::InvalidParam));
    }
}
