//! Generic fixed-capacity primitive pool with generation-tagged handles.
//!
//! Every primitive type (task, mutex, semaphore, queue, event group, timer)
//! is a fixed-size array of slots, each either free or occupied by one
//! control block. A [`Handle`](abi::Handle) names a slot by index plus a
//! generation counter; the generation is bumped on every `release`, so a
//! handle captured before a slot was freed and reused reads back as
//! `InvalidParam` rather than silently addressing someone else's object.
//! This is the same "don't trust the caller's numbers without checking them
//! against live state" posture the kernel's `app.rs` table validation takes
//! with task descriptors, applied to something closer to an allocator slab.

use core::sync::atomic::{AtomicU32, Ordering};

use abi::{Handle, Status};
use unwrap_lite::UnwrapLite;

use crate::backend::Lock;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A fixed-capacity pool of `T`, indexed by generation-tagged handle.
///
/// `N` is the pool's capacity, matching the corresponding `abi::defaults`
/// constant for the primitive kind `T` represents.
pub struct Pool<T, const N: usize> {
    slots: Lock<[Slot<T>; N]>,
    next_generation: AtomicU32,
}

impl<T, const N: usize> Pool<T, N> {
    pub fn empty() -> Self {
        Self {
            slots: Lock::new(core::array::from_fn(|_| Slot {
                generation: 0,
                value: None,
            })),
            next_generation: AtomicU32::new(1),
        }
    }

    /// Finds a free slot, stores `value` in it, and returns a handle that
    /// names it at its current generation. Returns `None` if the pool is
    /// exhausted.
    pub fn insert(&self, value: T) -> Option<Handle> {
        let mut slots = self.slots.lock();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                slot.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                slot.value = Some(value);
                return Some(Handle {
                    index: index as u16,
                    generation: slot.generation,
                });
            }
        }
        None
    }

    /// Removes and returns the value named by `handle`, bumping the slot's
    /// generation so any stale copy of `handle` subsequently resolves to
    /// `Status::InvalidParam`.
    pub fn remove(&self, handle: Handle) -> Result<T, Status> {
        let mut slots = self.slots.lock();
        let slot = self.slot_mut(&mut slots, handle)?;
        let value = slot.value.take().unwrap_lite();
        slot.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Runs `f` with a mutable reference to the control block named by
    /// `handle`. This is the primary accessor used by primitive modules.
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&mut T) -> R) -> Result<R, Status> {
        let mut slots = self.slots.lock();
        let slot = self.slot_mut(&mut slots, handle)?;
        let value = slot.value.as_mut().unwrap_lite();
        Ok(f(value))
    }

    /// Like [`Pool::with`], but also exposes every other occupied slot in
    /// the same pool so a primitive can scan siblings (used by the task
    /// manager to walk all tasks, and by the timer dispatcher to find the
    /// next expiry).
    pub fn for_each(&self, mut f: impl FnMut(Handle, &mut T)) {
        let mut slots = self.slots.lock();
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.as_mut() {
                f(
                    Handle {
                        index: index as u16,
                        generation: slot.generation,
                    },
                    value,
                );
            }
        }
    }

    fn validate(&self, slots: &[Slot<T>; N], handle: Handle) -> Result<usize, Status> {
        if handle.is_none() {
            return Err(Status::NullPointer);
        }
        let index = handle.index as usize;
        let slot = slots.get(index).ok_or(Status::InvalidParam)?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return Err(Status::InvalidParam);
        }
        Ok(index)
    }

    fn slot_mut<'a>(
        &self,
        slots: &'a mut [Slot<T>; N],
        handle: Handle,
    ) -> Result<&'a mut Slot<T>, Status> {
        let index = self.validate(slots, handle)?;
        Ok(&mut slots[index])
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.value.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_fetch_round_trips() {
        let pool: Pool<u32, 4> = Pool::empty();
        let h = pool.insert(42).unwrap();
        assert_eq!(pool.with(h, |v| *v).unwrap(), 42);
    }

    #[test]
    fn stale_handle_after_remove_is_rejected() {
        let pool: Pool<u32, 4> = Pool::empty();
        let h = pool.insert(1).unwrap();
        pool.remove(h).unwrap();
        assert_eq!(pool.with(h, |v| *v), Err(Status::InvalidParam));
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let pool: Pool<u32, 1> = Pool::empty();
        let h1 = pool.insert(1).unwrap();
        pool.remove(h1).unwrap();
        let h2 = pool.insert(2).unwrap();
        assert_eq!(h1.index, h2.index);
        assert_ne!(h1.generation, h2.generation);
        assert_eq!(pool.with(h1, |v| *v), Err(Status::InvalidParam));
        assert_eq!(pool.with(h2, |v| *v).unwrap(), 2);
    }

    #[test]
    fn exhausted_pool_rejects_insert() {
        let pool: Pool<u32, 1> = Pool::empty();
        pool.insert(1).unwrap();
        assert!(pool.insert(2).is_none());
    }

    #[test]
    fn null_handle_is_rejected() {
        let pool: Pool<u32, 4> = Pool::empty();
        assert_eq!(pool.with(Handle::NONE, |v| *v), Err(Status::NullPointer));
    }
}
