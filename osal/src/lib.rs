//! Operating System Abstraction Layer: pool-allocated concurrency
//! primitives and a tracked allocator, atop a preemptive (real OS threads)
//! or cooperative (round-robin run-token) substrate selected at compile
//! time via the `preemptive`/`cooperative` Cargo feature.
//!
//! Every primitive module (`mutex`, `semaphore`, `queue`, `event`, `timer`,
//! `task`) is written once against the surface `backend` re-exports, the
//! way the kernel's syscall implementations are written once against
//! `arch::ArchState` rather than duplicated per architecture.

pub mod backend;
pub mod event;
pub mod lifecycle;
pub mod memory;
pub mod mutex;
pub mod queue;
pub mod registry;
pub mod semaphore;
pub mod task;
pub mod time;
pub mod timer;

pub use abi::{
    EventWaitMode, Handle, Name, OsalResult, Priority, QueueMode, Status, TaskFlags, NO_WAIT,
    WAIT_FOREVER,
};

pub use lifecycle::{enter_critical, exit_critical, init, is_initialized, is_isr, is_running, start};
pub use task::{TaskConfig, TaskEntry};
pub use timer::{TimerCallback, TimerMode};
