//! 24-bit event-flag groups: independent bits, AND/OR wait predicates,
//! optional atomic auto-clear of the bits that satisfied the wait.

use abi::{EventWaitMode, Handle, Status, EVENT_MASK};

use crate::backend::{Lock, Signal};
use crate::registry::Pool;
use crate::time::Timeout;

struct EventControl {
    bits: u32,
}

pub struct EventGroup {
    control: Lock<EventControl>,
    changed: Signal,
}

static EVENT_GROUPS: std::sync::OnceLock<Pool<EventGroup, { abi::defaults::EVENT_GROUPS }>> =
    std::sync::OnceLock::new();

fn event_groups() -> &'static Pool<EventGroup, { abi::defaults::EVENT_GROUPS }> {
    EVENT_GROUPS.get_or_init(Pool::empty)
}

ringbuf::ringbuf!(EVENT_EVENTS, EventLogEntry, 32, EventLogEntry::None);

#[derive(Copy, Clone, PartialEq)]
enum EventLogEntry {
    None,
    Created(Handle),
    Set(Handle, u32),
    Cleared(Handle, u32),
    Matched(Handle, u32),
    Deleted(Handle),
}

pub fn create() -> Result<Handle, Status> {
    let group = EventGroup {
        control: Lock::new(EventControl { bits: 0 }),
        changed: Signal::new(),
    };
    match event_groups().insert(group) {
        Some(handle) => {
            ringbuf::ringbuf_entry!(EVENT_EVENTS, EventLogEntry::Created(handle));
            Ok(handle)
        }
        None => Err(Status::NoMemory),
    }
}

pub fn delete(handle: Handle) -> Result<(), Status> {
    event_groups().remove(handle).map(|_| {
        ringbuf::ringbuf_entry!(EVENT_EVENTS, EventLogEntry::Deleted(handle));
    })
}

pub fn set(handle: Handle, mask: u32) -> Result<(), Status> {
    if mask == 0 {
        return Err(Status::InvalidParam);
    }
    event_groups().with(handle, |g| {
        let mut guard = g.control.lock();
        guard.bits |= mask & EVENT_MASK;
        drop(guard);
        g.changed.notify_all();
        ringbuf::ringbuf_entry!(EVENT_EVENTS, EventLogEntry::Set(handle, mask & EVENT_MASK));
    })
}

/// Identical to `set` on host substrates: there is no ISR context to mask
/// against, so this is a direct alias rather than a distinct code path.
pub fn set_from_isr(handle: Handle, mask: u32) -> Result<(), Status> {
    set(handle, mask)
}

pub fn clear(handle: Handle, mask: u32) -> Result<(), Status> {
    if mask == 0 {
        return Err(Status::InvalidParam);
    }
    event_groups().with(handle, |g| {
        let mut guard = g.control.lock();
        guard.bits &= !(mask & EVENT_MASK);
        ringbuf::ringbuf_entry!(EVENT_EVENTS, EventLogEntry::Cleared(handle, mask & EVENT_MASK));
    })
}

fn predicate_holds(bits: u32, mask: u32, mode: EventWaitMode) -> bool {
    match mode {
        EventWaitMode::All => (bits & mask) == mask,
        EventWaitMode::Any => (bits & mask) != 0,
    }
}

pub fn wait(
    handle: Handle,
    mask: u32,
    mode: EventWaitMode,
    auto_clear: bool,
    timeout_ms: u32,
) -> Result<u32, Status> {
    if mask == 0 {
        return Err(Status::InvalidParam);
    }
    let mask = mask & EVENT_MASK;
    let timeout = Timeout::from(timeout_ms);
    event_groups().with(handle, |g| {
        let mut guard = g.control.lock();
        loop {
            if predicate_holds(guard.bits, mask, mode) {
                let matched = guard.bits & mask;
                if auto_clear {
                    guard.bits &= !matched;
                }
                ringbuf::ringbuf_entry!(EVENT_EVENTS, EventLogEntry::Matched(handle, matched));
                return Ok(matched);
            }
            if timeout.is_no_wait() {
                return Err(Status::Timeout);
            }
            let now = crate::backend::monotonic_now();
            let deadline = timeout.deadline_from(now);
            let (new_guard, timed_out) = g.changed.wait_timeout(guard, deadline);
            guard = new_guard;
            if timed_out && !predicate_holds(guard.bits, mask, mode) {
                return Err(Status::Timeout);
            }
        }
    })?
}

/// Current bits value. A NULL/invalid handle returns 0 rather than an
/// error, so observers can poll `get` without threading error handling
/// through every call site.
pub fn get(handle: Handle) -> u32 {
    event_groups().with(handle, |g| g.control.lock().bits).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_clear_scenario_s3() {
        let h = create().unwrap();
        set(h, 0x0F).unwrap();
        let matched = wait(h, 0x03, EventWaitMode::Any, true, abi::NO_WAIT).unwrap();
        assert_eq!(matched, 0x03);
        assert_eq!(get(h), 0x0C);
        let matched2 = wait(h, 0x0C, EventWaitMode::All, true, abi::NO_WAIT).unwrap();
        assert_eq!(matched2, 0x0C);
        assert_eq!(get(h), 0x00);
        delete(h).unwrap();
    }

    #[test]
    fn bits_outside_mask24_are_dropped() {
        let h = create().unwrap();
        set(h, 0xFFFF_FFFF).unwrap();
        assert_eq!(get(h) & !EVENT_MASK, 0);
        delete(h).unwrap();
    }

    #[test]
    fn wait_all_requires_every_bit() {
        let h = create().unwrap();
        set(h, 0x01).unwrap();
        assert_eq!(wait(h, 0x03, EventWaitMode::All, false, abi::NO_WAIT), Err(Status::Timeout));
        set(h, 0x02).unwrap();
        assert_eq!(wait(h, 0x03, EventWaitMode::All, false, abi::NO_WAIT), Ok(0x03));
        delete(h).unwrap();
    }

    #[test]
    fn get_on_invalid_handle_is_zero() {
        assert_eq!(get(Handle::NONE), 0);
    }

    #[test]
    fn zero_mask_is_invalid() {
        let h = create().unwrap();
        assert_eq!(set(h, 0), Err(Status::InvalidParam));
        assert_eq!(wait(h, 0, EventWaitMode::Any, false, abi::NO_WAIT), Err(Status::InvalidParam));
        delete(h).unwrap();
    }
}
