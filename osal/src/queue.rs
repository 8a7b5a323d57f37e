//! Bounded FIFO queue with fixed item size and copy-in/copy-out semantics.
//!
//! The backing store is a plain heap-allocated byte buffer sized
//! `item_size * capacity` at `create` time (capacity is a runtime value,
//! unlike the compile-time-sized pools elsewhere in this crate, so it
//! can't live in a `heapless` container without picking one oversized
//! upper bound for every queue regardless of its actual item size).

use abi::{Handle, QueueMode, Status};

use crate::backend::{Lock, Signal};
use crate::registry::Pool;
use crate::time::Timeout;

struct QueueControl {
    buffer: std::vec::Vec<u8>,
    item_size: usize,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
    mode: QueueMode,
}

impl QueueControl {
    fn slot(&self, index: usize) -> &[u8] {
        &self.buffer[index * self.item_size..(index + 1) * self.item_size]
    }

    fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.buffer[index * self.item_size..(index + 1) * self.item_size]
    }
}

pub struct Queue {
    control: Lock<QueueControl>,
    not_empty: Signal,
    not_full: Signal,
}

static QUEUES: std::sync::OnceLock<Pool<Queue, { abi::defaults::QUEUES }>> =
    std::sync::OnceLock::new();

fn queues() -> &'static Pool<Queue, { abi::defaults::QUEUES }> {
    QUEUES.get_or_init(Pool::empty)
}

ringbuf::ringbuf!(QUEUE_EVENTS, QueueEvent, 32, QueueEvent::None);

#[derive(Copy, Clone, PartialEq)]
enum QueueEvent {
    None,
    Created(Handle),
    Sent(Handle),
    Full(Handle),
    Received(Handle),
    Reset(Handle),
    Deleted(Handle),
}

pub fn create(item_size: usize, capacity: usize) -> Result<Handle, Status> {
    if item_size == 0 || capacity == 0 {
        return Err(Status::InvalidParam);
    }
    let queue = Queue {
        control: Lock::new(QueueControl {
            buffer: std::vec![0u8; item_size * capacity],
            item_size,
            capacity,
            head: 0,
            tail: 0,
            count: 0,
            mode: QueueMode::Normal,
        }),
        not_empty: Signal::new(),
        not_full: Signal::new(),
    };
    match queues().insert(queue) {
        Some(handle) => {
            ringbuf::ringbuf_entry!(QUEUE_EVENTS, QueueEvent::Created(handle));
            Ok(handle)
        }
        None => Err(Status::NoMemory),
    }
}

pub fn delete(handle: Handle) -> Result<(), Status> {
    queues().remove(handle).map(|_| {
        ringbuf::ringbuf_entry!(QUEUE_EVENTS, QueueEvent::Deleted(handle));
    })
}

fn copy_item(item: &[u8], dst: &mut [u8]) -> Result<(), Status> {
    if item.len() != dst.len() {
        return Err(Status::InvalidParam);
    }
    dst.copy_from_slice(item);
    Ok(())
}

pub fn send(handle: Handle, item: &[u8], timeout_ms: u32) -> Result<(), Status> {
    send_inner(handle, item, timeout_ms, false)
}

pub fn send_front(handle: Handle, item: &[u8], timeout_ms: u32) -> Result<(), Status> {
    send_inner(handle, item, timeout_ms, true)
}

fn send_inner(handle: Handle, item: &[u8], timeout_ms: u32, front: bool) -> Result<(), Status> {
    let timeout = Timeout::from(timeout_ms);
    queues().with(handle, |q| {
        let mut guard = q.control.lock();
        loop {
            if guard.count < guard.capacity {
                if front {
                    let new_head = (guard.head + guard.capacity - 1) % guard.capacity;
                    copy_item(item, guard.slot_mut(new_head))?;
                    guard.head = new_head;
                } else {
                    let tail = guard.tail;
                    copy_item(item, guard.slot_mut(tail))?;
                    guard.tail = (guard.tail + 1) % guard.capacity;
                }
                guard.count += 1;
                drop(guard);
                q.not_empty.notify_one();
                ringbuf::ringbuf_entry!(QUEUE_EVENTS, QueueEvent::Sent(handle));
                return Ok(());
            }
            if guard.mode == QueueMode::Overwrite {
                guard.head = (guard.head + 1) % guard.capacity;
                guard.count -= 1;
                continue;
            }
            if timeout.is_no_wait() {
                ringbuf::ringbuf_entry!(QUEUE_EVENTS, QueueEvent::Full(handle));
                return Err(Status::Full);
            }
            let now = crate::backend::monotonic_now();
            let deadline = timeout.deadline_from(now);
            let (new_guard, timed_out) = q.not_full.wait_timeout(guard, deadline);
            guard = new_guard;
            if timed_out && guard.count == guard.capacity {
                return Err(Status::Full);
            }
        }
    })?
}

pub fn receive(handle: Handle, item: &mut [u8], timeout_ms: u32) -> Result<(), Status> {
    let timeout = Timeout::from(timeout_ms);
    queues().with(handle, |q| {
        let mut guard = q.control.lock();
        loop {
            if guard.count > 0 {
                let head = guard.head;
                copy_item(guard.slot(head), item)?;
                guard.head = (guard.head + 1) % guard.capacity;
                guard.count -= 1;
                drop(guard);
                q.not_full.notify_one();
                ringbuf::ringbuf_entry!(QUEUE_EVENTS, QueueEvent::Received(handle));
                return Ok(());
            }
            if timeout.is_no_wait() {
                return Err(Status::Empty);
            }
            let now = crate::backend::monotonic_now();
            let deadline = timeout.deadline_from(now);
            let (new_guard, timed_out) = q.not_empty.wait_timeout(guard, deadline);
            guard = new_guard;
            if timed_out && guard.count == 0 {
                return Err(Status::Empty);
            }
        }
    })?
}

pub fn peek(handle: Handle, item: &mut [u8]) -> Result<(), Status> {
    queues().with(handle, |q| {
        let guard = q.control.lock();
        if guard.count == 0 {
            return Err(Status::Empty);
        }
        copy_item(guard.slot(guard.head), item)
    })?
}

/// Identical to `peek` on host substrates.
pub fn peek_from_isr(handle: Handle, item: &mut [u8]) -> Result<(), Status> {
    peek(handle, item)
}

pub fn send_from_isr(handle: Handle, item: &[u8]) -> Result<(), Status> {
    send(handle, item, abi::NO_WAIT)
}

pub fn receive_from_isr(handle: Handle, item: &mut [u8]) -> Result<(), Status> {
    receive(handle, item, abi::NO_WAIT)
}

pub fn reset(handle: Handle) -> Result<(), Status> {
    queues().with(handle, |q| {
        let mut guard = q.control.lock();
        guard.count = 0;
        guard.head = 0;
        guard.tail = 0;
        drop(guard);
        q.not_full.notify_all();
        ringbuf::ringbuf_entry!(QUEUE_EVENTS, QueueEvent::Reset(handle));
    })
}

pub fn set_mode(handle: Handle, mode: QueueMode) -> Result<(), Status> {
    queues().with(handle, |q| {
        q.control.lock().mode = mode;
    })
}

pub fn get_count(handle: Handle) -> Result<usize, Status> {
    queues().with(handle, |q| q.control.lock().count)
}

pub fn get_available_space(handle: Handle) -> Result<usize, Status> {
    queues().with(handle, |q| {
        let guard = q.control.lock();
        guard.capacity - guard.count
    })
}

pub fn is_empty(handle: Handle) -> Result<bool, Status> {
    get_count(handle).map(|c| c == 0)
}

pub fn is_full(handle: Handle) -> Result<bool, Status> {
    queues().with(handle, |q| {
        let guard = q.control.lock();
        guard.count == guard.capacity
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_round_trip_s2() {
        let h = create(core::mem::size_of::<i32>(), 20).unwrap();
        for i in 0..20i32 {
            send(h, &i.to_ne_bytes(), abi::NO_WAIT).unwrap();
        }
        for i in 0..20i32 {
            let mut buf = [0u8; 4];
            receive(h, &mut buf, abi::NO_WAIT).unwrap();
            assert_eq!(i32::from_ne_bytes(buf), i);
        }
        assert!(is_empty(h).unwrap());
        assert_eq!(get_count(h).unwrap(), 0);
        delete(h).unwrap();
    }

    #[test]
    fn capacity_boundary_s8() {
        let h = create(1, 3).unwrap();
        for b in [1u8, 2, 3] {
            send(h, &[b], abi::NO_WAIT).unwrap();
        }
        assert_eq!(send(h, &[4], abi::NO_WAIT), Err(Status::Full));
        let mut buf = [0u8; 1];
        receive(h, &mut buf, abi::NO_WAIT).unwrap();
        assert_eq!(buf[0], 1);
        send(h, &[4], abi::NO_WAIT).unwrap();
        assert_eq!(get_count(h).unwrap(), 3);
        delete(h).unwrap();
    }

    #[test]
    fn space_invariant_holds() {
        let h = create(1, 5).unwrap();
        send(h, &[1], abi::NO_WAIT).unwrap();
        assert_eq!(
            get_count(h).unwrap() + get_available_space(h).unwrap(),
            5
        );
        delete(h).unwrap();
    }

    #[test]
    fn reset_empties_queue() {
        let h = create(1, 4).unwrap();
        send(h, &[1], abi::NO_WAIT).unwrap();
        send(h, &[2], abi::NO_WAIT).unwrap();
        reset(h).unwrap();
        assert!(is_empty(h).unwrap());
        assert_eq!(get_available_space(h).unwrap(), 4);
        delete(h).unwrap();
    }

    #[test]
    fn peek_is_non_destructive() {
        let h = create(1, 4).unwrap();
        send(h, &[9], abi::NO_WAIT).unwrap();
        let mut buf = [0u8; 1];
        peek(h, &mut buf).unwrap();
        peek(h, &mut buf).unwrap();
        assert_eq!(buf[0], 9);
        assert_eq!(get_count(h).unwrap(), 1);
        delete(h).unwrap();
    }

    #[test]
    fn send_front_bypasses_fifo() {
        let h = create(1, 4).unwrap();
        send(h, &[1], abi::NO_WAIT).unwrap();
        send_front(h, &[2], abi::NO_WAIT).unwrap();
        let mut buf = [0u8; 1];
        receive(h, &mut buf, abi::NO_WAIT).unwrap();
        assert_eq!(buf[0], 2);
        receive(h, &mut buf, abi::NO_WAIT).unwrap();
        assert_eq!(buf[0], 1);
        delete(h).unwrap();
    }

    #[test]
    fn overwrite_mode_evicts_oldest() {
        let h = create(1, 2).unwrap();
        set_mode(h, QueueMode::Overwrite).unwrap();
        send(h, &[1], abi::NO_WAIT).unwrap();
        send(h, &[2], abi::NO_WAIT).unwrap();
        send(h, &[3], abi::NO_WAIT).unwrap();
        let mut buf = [0u8; 1];
        receive(h, &mut buf, abi::NO_WAIT).unwrap();
        assert_eq!(buf[0], 2);
        receive(h, &mut buf, abi::NO_WAIT).unwrap();
        assert_eq!(buf[0], 3);
        delete(h).unwrap();
    }
}
