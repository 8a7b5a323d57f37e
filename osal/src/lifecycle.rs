//! Global runtime lifecycle: init, start, and critical sections.
//!
//! Mirrors the kernel's own bring-up shape (`startup::start_kernel`
//! validates and locks down state once, then never runs again) but
//! generalized to a library that can be initialized more than once from
//! tests: `init` is idempotent rather than a one-shot `unsafe fn start_*`.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::backend;

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static RUNNING: AtomicBool = AtomicBool::new(false);

thread_local! {
    // Per-thread nesting depth: re-entering a critical section on the same
    // thread just bumps this counter, but the raw lock underneath it is
    // process-wide, so two different threads calling `enter_critical`
    // concurrently still serialize against each other the way a real
    // interrupt-disable would on a single core.
    static CRITICAL_DEPTH: core::cell::Cell<u32> = core::cell::Cell::new(0);
    static HELD_TOKEN: core::cell::RefCell<Option<backend::RawToken>> =
        core::cell::RefCell::new(None);
}

/// Brings up process-wide OSAL state. Idempotent: calling `init` more than
/// once (from repeated test setup, for instance) is a no-op after the
/// first call, rather than a fault.
pub fn init() {
    INITIALIZED.store(true, Ordering::SeqCst);
}

/// Marks the runtime as started and parks the calling thread as the idle
/// loop. On the preemptive substrate this is a low-priority sleep loop,
/// since real scheduling happens across independently-spawned task
/// threads; on the cooperative substrate the distinction is moot since
/// there is no separate dispatcher thread to block.
///
/// `start` never returns on a real embedded target; here it returns once
/// `stop_for_test` is called, so test harnesses can tear down cleanly.
pub fn start() {
    assert!(is_initialized(), "start() called before init()");
    RUNNING.store(true, Ordering::SeqCst);
    while RUNNING.load(Ordering::SeqCst) {
        backend::idle_park();
    }
}

/// Test-only escape hatch for `start()`'s idle loop; not part of the
/// public OSAL surface described by the API table.
#[cfg(test)]
pub fn stop_for_test() {
    RUNNING.store(false, Ordering::SeqCst);
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

pub fn is_running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

/// Enters a critical section, masking scheduling/interrupts until a
/// matching number of `exit_critical` calls. Nestable: only the outermost
/// `enter_critical` actually takes the underlying lock, the way a
/// re-entrant disable-interrupts counter works on real hardware.
pub fn enter_critical() {
    let depth = CRITICAL_DEPTH.with(|d| {
        let prev = d.get();
        d.set(prev + 1);
        prev
    });
    if depth == 0 {
        let token = backend::raw_critical_acquire();
        HELD_TOKEN.with(|cell| *cell.borrow_mut() = Some(token));
    }
}

/// Leaves a critical section previously entered with `enter_critical`.
/// Calling this without a matching `enter_critical` on the same thread is
/// a caller bug; it is a no-op rather than a panic, since the OSAL never
/// panics on misuse from task context.
pub fn exit_critical() {
    let depth = CRITICAL_DEPTH.with(|d| d.get());
    if depth == 0 {
        return;
    }
    CRITICAL_DEPTH.with(|d| d.set(depth - 1));
    if depth == 1 {
        if let Some(token) = HELD_TOKEN.with(|cell| cell.borrow_mut().take()) {
            backend::raw_critical_release(token);
        }
    }
}

pub fn is_isr() -> bool {
    backend::is_isr()
}
