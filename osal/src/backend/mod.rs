//! Substrate polymorphism.
//!
//! Everything above this module -- the primitive pools, the handle
//! registry, the timer dispatcher -- is written once against the surface
//! re-exported here. The two backend modules implement that same surface
//! (same type and function names) over genuinely different mechanisms: real
//! condition variables and OS threads on the preemptive substrate, a
//! spinlock and timed busy-polling on the cooperative substrate. Swapping
//! the `preemptive`/`cooperative` Cargo feature swaps the whole backend
//! without touching a primitive module.
//!
//! This is the generalization of the kernel's `arch::simulator` vs
//! `arch::arm_m` split: there, the two modules implement `ArchState` for a
//! host simulator and for real Cortex-M silicon; here, they implement the
//! blocking/wakeup/clock surface for a host OS and for a bare-metal
//! round-robin dispatcher.

cfg_if::cfg_if! {
    if #[cfg(feature = "preemptive")] {
        mod preemptive;
        pub use preemptive::*;
    } else if #[cfg(feature = "cooperative")] {
        mod cooperative;
        pub use cooperative::*;
    } else {
        compile_error!("osal requires exactly one of the `preemptive` or `cooperative` features");
    }
}

/// Granularity at which the cooperative substrate polls for a predicate to
/// become true. The preemptive substrate wakes immediately on `notify_*`
/// instead of polling, but callers must not assume sub-millisecond latency
/// on either backend.
pub const POLL_GRANULARITY_MS: u32 = 1;
