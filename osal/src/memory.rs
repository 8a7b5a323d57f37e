//! Tracked memory allocator: a doubly-linked list of live allocations behind
//! `std::alloc`, with a header placed immediately before every payload so
//! `free` recovers it by pointer arithmetic.
//!
//! Hubris tasks are statically sized at build time and never allocate
//! dynamically, so there is no existing allocator module to adapt; this is
//! built directly against `std::alloc`'s `Layout`/`alloc`/`dealloc`, the
//! idiomatic Rust equivalent of a `malloc`-wrapping C allocator with
//! tracked statistics.

use core::alloc::Layout;

use abi::{defaults, Status};

use crate::backend::Lock;

#[repr(C)]
struct AllocationHeader {
    /// Requested payload size, not including this header or alignment pad.
    size: usize,
    /// Alignment requested via `alloc_aligned`, or 0 for plain allocations.
    alignment: usize,
    /// The pointer actually returned by the underlying allocator. For plain
    /// allocations this equals the header's own address; for aligned
    /// allocations the header sits at a computed offset from it, so `free`
    /// needs this to find the block the allocator itself must be handed
    /// back.
    raw_ptr: *mut u8,
    /// Layout used for the underlying allocation, needed by `dealloc`.
    raw_layout: Layout,
    prev: *mut AllocationHeader,
    next: *mut AllocationHeader,
}

// Safety: every field is only read or mutated while holding `Tracker`'s lock;
// no two threads ever touch a header concurrently without it.
unsafe impl Send for AllocationHeader {}

#[derive(Copy, Clone, Debug, Default)]
pub struct Stats {
    pub total_allocated: usize,
    pub peak_allocated: usize,
    pub allocation_count: usize,
}

struct Tracker {
    head: *mut AllocationHeader,
    stats: Stats,
}

unsafe impl Send for Tracker {}

static TRACKER: std::sync::OnceLock<Lock<Tracker>> = std::sync::OnceLock::new();

fn tracker() -> &'static Lock<Tracker> {
    TRACKER.get_or_init(|| {
        Lock::new(Tracker {
            head: core::ptr::null_mut(),
            stats: Stats::default(),
        })
    })
}

ringbuf::ringbuf!(MEMORY_EVENTS, MemoryEvent, 32, MemoryEvent::None);

#[derive(Copy, Clone, PartialEq)]
enum MemoryEvent {
    None,
    Allocated(usize),
    Freed(usize),
    IntegrityFault,
}

fn header_layout() -> Layout {
    Layout::new::<AllocationHeader>()
}

/// Links a freshly-allocated header into the live list and updates stats.
/// Called with the tracker lock held.
fn link(t: &mut Tracker, header: *mut AllocationHeader, size: usize) {
    unsafe {
        (*header).prev = core::ptr::null_mut();
        (*header).next = t.head;
        if !t.head.is_null() {
            (*t.head).prev = header;
        }
        t.head = header;
    }
    t.stats.total_allocated += size;
    t.stats.allocation_count += 1;
    if t.stats.total_allocated > t.stats.peak_allocated {
        t.stats.peak_allocated = t.stats.total_allocated;
    }
}

/// Unlinks `header` from the live list and updates stats. Called with the
/// tracker lock held.
fn unlink(t: &mut Tracker, header: *mut AllocationHeader) {
    unsafe {
        let prev = (*header).prev;
        let next = (*header).next;
        if !prev.is_null() {
            (*prev).next = next;
        } else {
            t.head = next;
        }
        if !next.is_null() {
            (*next).prev = prev;
        }
        t.stats.total_allocated -= (*header).size;
    }
    t.stats.allocation_count -= 1;
}

/// Recovers the header immediately preceding `payload`.
fn header_of(payload: *mut u8) -> *mut AllocationHeader {
    unsafe { payload.sub(header_layout().size()) as *mut AllocationHeader }
}

pub fn alloc(size: usize) -> *mut u8 {
    if size == 0 {
        return core::ptr::null_mut();
    }
    let header_size = header_layout().size();
    let Ok(layout) = Layout::from_size_align(header_size + size, header_layout().align()) else {
        return core::ptr::null_mut();
    };
    let raw = unsafe { std::alloc::alloc(layout) };
    if raw.is_null() {
        return core::ptr::null_mut();
    }
    let header = raw as *mut AllocationHeader;
    let payload = unsafe { raw.add(header_layout().size()) };
    unsafe {
        core::ptr::write(
            header,
            AllocationHeader {
                size,
                alignment: 0,
                raw_ptr: raw,
                raw_layout: layout,
                prev: core::ptr::null_mut(),
                next: core::ptr::null_mut(),
            },
        );
    }
    let mut guard = tracker().lock();
    link(&mut guard, header, size);
    drop(guard);
    ringbuf::ringbuf_entry!(MEMORY_EVENTS, MemoryEvent::Allocated(size));
    payload
}

pub fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let header = header_of(ptr);
    let (raw_ptr, raw_layout, size) =
        unsafe { ((*header).raw_ptr, (*header).raw_layout, (*header).size) };
    let mut guard = tracker().lock();
    unlink(&mut guard, header);
    drop(guard);
    unsafe { std::alloc::dealloc(raw_ptr, raw_layout) };
    ringbuf::ringbuf_entry!(MEMORY_EVENTS, MemoryEvent::Freed(size));
}

pub fn calloc(count: usize, size: usize) -> *mut u8 {
    if count == 0 || size == 0 {
        return core::ptr::null_mut();
    }
    let total = match count.checked_mul(size) {
        Some(t) if t / count == size => t,
        _ => return core::ptr::null_mut(),
    };
    let payload = alloc(total);
    if !payload.is_null() {
        unsafe { core::ptr::write_bytes(payload, 0, total) };
    }
    payload
}

pub fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    if ptr.is_null() {
        return alloc(size);
    }
    if size == 0 {
        free(ptr);
        return core::ptr::null_mut();
    }
    let header = header_of(ptr);
    let old_size = unsafe { (*header).size };
    let new_payload = alloc(size);
    if new_payload.is_null() {
        // Allocation failed; the original block is left intact.
        return core::ptr::null_mut();
    }
    unsafe {
        core::ptr::copy_nonoverlapping(ptr, new_payload, old_size.min(size));
    }
    free(ptr);
    new_payload
}

pub fn alloc_aligned(alignment: usize, size: usize) -> *mut u8 {
    if size == 0 || alignment == 0 || !alignment.is_power_of_two() {
        return core::ptr::null_mut();
    }
    let header_size = header_layout().size();
    let overalloc = header_size + size + alignment - 1;
    let Ok(raw_layout) = Layout::from_size_align(overalloc, core::mem::align_of::<AllocationHeader>())
    else {
        return core::ptr::null_mut();
    };
    let raw = unsafe { std::alloc::alloc(raw_layout) };
    if raw.is_null() {
        return core::ptr::null_mut();
    }
    let search_start = unsafe { raw.add(header_size) } as usize;
    let aligned_addr = (search_start + alignment - 1) & !(alignment - 1);
    let payload = aligned_addr as *mut u8;
    let header = header_of(payload);
    unsafe {
        core::ptr::write(
            header,
            AllocationHeader {
                size,
                alignment,
                raw_ptr: raw,
                raw_layout,
                prev: core::ptr::null_mut(),
                next: core::ptr::null_mut(),
            },
        );
    }
    let mut guard = tracker().lock();
    link(&mut guard, header, size);
    drop(guard);
    ringbuf::ringbuf_entry!(MEMORY_EVENTS, MemoryEvent::Allocated(size));
    payload
}

/// Dispatches to the aligned free path: recovers the originally-allocated
/// raw pointer from the header rather than releasing the header's own
/// address, since the two differ for an aligned allocation.
pub fn free_aligned(ptr: *mut u8) {
    free(ptr);
}

pub fn get_stats() -> Stats {
    tracker().lock().stats
}

pub fn get_free_size() -> usize {
    defaults::SIMULATED_HEAP_BYTES.saturating_sub(tracker().lock().stats.total_allocated)
}

pub fn get_min_free_size() -> usize {
    defaults::SIMULATED_HEAP_BYTES.saturating_sub(tracker().lock().stats.peak_allocated)
}

pub fn get_allocation_count() -> usize {
    tracker().lock().stats.allocation_count
}

/// Walks the live list verifying the doubly-linked structure is internally
/// consistent: every node's `next.prev` (and `prev.next`) points back to it.
pub fn check_integrity() -> Status {
    let guard = tracker().lock();
    let mut node = guard.head;
    let mut prev: *mut AllocationHeader = core::ptr::null_mut();
    let mut seen = 0usize;
    unsafe {
        while !node.is_null() {
            if (*node).prev != prev {
                ringbuf::ringbuf_entry!(MEMORY_EVENTS, MemoryEvent::IntegrityFault);
                return Status::Error;
            }
            seen += 1;
            if seen > guard.stats.allocation_count {
                ringbuf::ringbuf_entry!(MEMORY_EVENTS, MemoryEvent::IntegrityFault);
                return Status::Error;
            }
            prev = node;
            node = (*node).next;
        }
    }
    if seen != guard.stats.allocation_count {
        return Status::Error;
    }
    Status::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_round_trip_tracks_peak() {
        let p = alloc(64);
        assert!(!p.is_null());
        let before = get_stats().total_allocated;
        assert!(before >= 64);
        free(p);
        assert_eq!(get_stats().total_allocated, before - 64);
        assert_eq!(check_integrity(), Status::Ok);
    }

    #[test]
    fn peak_is_monotone_after_free() {
        let p1 = alloc(128);
        let peak_after_first = get_stats().peak_allocated;
        free(p1);
        let p2 = alloc(16);
        assert!(get_stats().peak_allocated >= peak_after_first);
        free(p2);
    }

    #[test]
    fn zero_size_alloc_is_null() {
        assert!(alloc(0).is_null());
    }

    #[test]
    fn calloc_detects_overflow() {
        assert!(calloc(usize::MAX, 2).is_null());
    }

    #[test]
    fn calloc_zeros_memory() {
        let p = calloc(4, 8);
        assert!(!p.is_null());
        let bytes = unsafe { core::slice::from_raw_parts(p, 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        free(p);
    }

    #[test]
    fn realloc_preserves_contents() {
        let p = alloc(4);
        unsafe { core::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), p, 4) };
        let p2 = realloc(p, 8);
        assert!(!p2.is_null());
        let bytes = unsafe { core::slice::from_raw_parts(p2, 4) };
        assert_eq!(bytes, &[1, 2, 3, 4]);
        free(p2);
    }

    #[test]
    fn realloc_to_zero_frees() {
        let p = alloc(8);
        assert!(realloc(p, 0).is_null());
    }

    #[test]
    fn aligned_alloc_round_trip() {
        for alignment in [4usize, 8, 16, 32, 64] {
            let p = alloc_aligned(alignment, 37);
            assert!(!p.is_null());
            assert_eq!((p as usize) % alignment, 0);
            free_aligned(p);
        }
        assert_eq!(check_integrity(), Status::Ok);
    }

    #[test]
    fn aligned_alloc_rejects_non_power_of_two() {
        assert!(alloc_aligned(3, 16).is_null());
    }

    #[test]
    fn free_of_null_is_noop() {
        free(core::ptr::null_mut());
    }
}
