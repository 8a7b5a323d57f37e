//! Ring buffers for instrumenting the OSAL runtime.
//!
//! This is the runtime's only logging facility: primitive modules drop an
//! entry in a named ring buffer at points a production build can't afford to
//! pay for `format!`/allocation (lock acquisition, blocking wakeups, timer
//! firings). Entries are fixed-size payloads, deduplicated against the most
//! recent entry so a hot loop doesn't evict its own history.
//!
//! Unlike a textual logger, a ring buffer never blocks, never allocates, and
//! has a compile-time-bounded footprint, so it is safe to call from the
//! cooperative backend's critical sections as well as from ordinary task
//! code on the preemptive backend. Both backends run real OS threads on
//! host, so (unlike the single-threaded embedded original this is grounded
//! on) entries are appended under a spinlock rather than left to the
//! generation-counter-only scheme a strictly single-threaded caller could
//! use safely.
//!
//! ## Creating a ring buffer
//!
//! ```
//! ringbuf::ringbuf!(EVENTS, u32, 16, 0);
//! ringbuf::ringbuf_entry!(EVENTS, 42);
//! ```

#![no_std]

use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Declares a ring buffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ring buffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all
/// initialized to `expr`. If you omit the name, it defaults to `__RINGBUF`.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::Ringbuf<$t, $n> = $crate::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Inserts data into a named ring buffer (declared with [`ringbuf!`]).
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {
        $crate::Ringbuf::entry(&$buf, line!() as u16, $payload)
    };
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload)
    };
}

/// A single ring buffer slot.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u32,
    pub count: u32,
    pub payload: T,
}

/// A fixed-capacity, spinlock-guarded ring buffer of `N` entries of type `T`.
///
/// When an entry is generated with the same `line` and `payload` as the most
/// recent entry, its `count` is incremented in place rather than consuming a
/// new slot, so a busy-polling loop doesn't wash out the history that
/// preceded it.
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: AtomicUsize,
    buffer: Mutex<[RingbufEntry<T>; N]>,
}

const NO_LAST: usize = usize::MAX;

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: AtomicUsize::new(NO_LAST),
            buffer: Mutex::new(
                [RingbufEntry { line: 0, generation: 0, count: 0, payload: init }; N],
            ),
        }
    }

    pub fn entry(&self, line: u16, payload: T) {
        let mut buf = self.buffer.lock();
        let last = self.last.load(Ordering::Relaxed);

        if last != NO_LAST {
            let ent = &mut buf[last];
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let next = if last == NO_LAST {
            0
        } else if last + 1 >= N {
            0
        } else {
            last + 1
        };

        let ent = &mut buf[next];
        ent.line = line;
        ent.payload = payload;
        ent.count = 1;
        ent.generation = ent.generation.wrapping_add(1);
        self.last.store(next, Ordering::Relaxed);
    }

    /// Snapshots the buffer's current contents, oldest first.
    ///
    /// Intended for tests and debug dumps; takes the spinlock for the
    /// duration of the copy.
    pub fn snapshot(&self) -> [RingbufEntry<T>; N] {
        *self.buffer.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    ringbuf!(TEST_RINGBUF, u32, 4, 0);

    #[test]
    fn repeated_entries_coalesce() {
        TEST_RINGBUF.entry(1, 7);
        TEST_RINGBUF.entry(1, 7);
        TEST_RINGBUF.entry(1, 7);
        let snap = TEST_RINGBUF.snapshot();
        assert_eq!(snap[0].payload, 7);
        assert_eq!(snap[0].count, 3);
    }

    #[test]
    fn distinct_entries_advance() {
        ringbuf!(DISTINCT, u32, 2, 0);
        ringbuf_entry!(DISTINCT, 1);
        ringbuf_entry!(DISTINCT, 2);
        ringbuf_entry!(DISTINCT, 3);
        let snap = DISTINCT.snapshot();
        // Capacity 2, so entry `1` has been overwritten by wraparound.
        assert!(snap.iter().any(|e| e.payload == 2));
        assert!(snap.iter().any(|e| e.payload == 3));
    }
}
