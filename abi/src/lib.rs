//! OSAL ABI definitions, shared between the runtime crate and its callers.
//!
//! Nothing in here owns a lock or a thread; it is pure data so that both the
//! preemptive and cooperative backends, and any future backend, agree on the
//! shape of handles, configuration records, and outcome codes.

#![no_std]

/// Number of bits of effective width in an event-flag mask. Bits at or above
/// this width are silently dropped by `set` and `wait`.
pub const EVENT_MASK_BITS: u32 = 24;

/// Mask selecting the effective bits of an event-flag group.
pub const EVENT_MASK: u32 = (1 << EVENT_MASK_BITS) - 1;

/// Reserved timeout value meaning "do not block; fail immediately if the
/// resource is not already available."
pub const NO_WAIT: u32 = 0;

/// Reserved timeout value meaning "block with no deadline."
///
/// Chosen as `u32::MAX` rather than a sentinel enum so that the timeout stays
/// a plain integer at the API boundary, matching how `OSAL_QueueTimeout`-style
/// fields are represented in comparable RTOS abstraction layers.
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Default pool capacities, overridable per embedding via `PoolLimits`.
pub mod defaults {
    pub const TASKS: usize = 8;
    pub const MUTEXES: usize = 8;
    pub const SEMAPHORES: usize = 8;
    pub const QUEUES: usize = 4;
    pub const EVENT_GROUPS: usize = 16;
    pub const TIMERS: usize = 16;
    /// Longest task/timer name, including the terminating nul.
    pub const NAME_LEN: usize = 16;
    /// Simulated total heap, used only to compute tracker statistics on
    /// hosted substrates where the real heap is the process heap.
    pub const SIMULATED_HEAP_BYTES: usize = 1024 * 1024;
}

/// Outcome code returned by every fallible OSAL operation.
///
/// Errors are tagged, never thrown: every API call that can fail returns a
/// `Status`, and `Status::Ok` is the only success value. This mirrors the
/// kernel's `UserError`/fault split, collapsed into a single flat enum since
/// the OSAL has no task-fault concept of its own.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error,
    NullPointer,
    InvalidParam,
    NoMemory,
    Timeout,
    Full,
    Empty,
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// A `Result` alias for OSAL operations that produce a value on success but
/// otherwise only need to report a `Status`.
pub type OsalResult<T> = Result<T, Status>;

/// Generation-tagged pool index.
///
/// A handle is never a bare array index: it pairs the index with a
/// generation counter bumped on every delete of that slot. This means a
/// handle captured before a delete, then replayed after the slot has been
/// reused by a new `create`, is rejected rather than silently operating on
/// the wrong object -- strictly stronger than validating by address alone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Handle {
    pub index: u16,
    pub generation: u32,
}

impl Handle {
    pub const NONE: Handle = Handle { index: u16::MAX, generation: 0 };

    pub fn is_none(&self) -> bool {
        self.index == u16::MAX
    }
}

/// Priority of a task, 0 (lowest) through 31 (highest).
///
/// Deliberately the opposite convention of the kernel's `Priority`, where 0
/// is *most* important: RTOS-style OSALs number priorities the other way,
/// so this follows that convention rather than carry over the kernel's
/// numbering and invite an off-by-everything bug.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(31);

    pub fn is_valid(self) -> bool {
        self.0 <= 31
    }

    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

bitflags::bitflags! {
    /// Behavioral flags for `TaskConfig`.
    #[derive(Default, Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TaskFlags: u32 {
        /// Start the task suspended; it must be resumed explicitly.
        const START_SUSPENDED = 1 << 0;
    }
}

/// Wait mode for `event_wait`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventWaitMode {
    /// Predicate holds when any bit in the mask is set.
    Any,
    /// Predicate holds when every bit in the mask is set.
    All,
}

/// Queue overwrite policy. See `QueueMode::Overwrite` for the one open
/// question this resolves.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum QueueMode {
    #[default]
    Normal,
    /// `send` on a full queue evicts the oldest item instead of failing.
    /// Supported uniformly by both backends; see the core crate's queue
    /// module for the eviction algorithm.
    Overwrite,
}

/// Bounded, nul-terminated-by-convention name shared by tasks and timers.
///
/// Stored as owned bytes (not a borrowed `&str`) because the registry copies
/// names in at create time: the caller's string buffer is not assumed to
/// outlive the primitive.
pub type Name = heapless::String<{ defaults::NAME_LEN }>;

/// Builds a default name of the form `task_<slot>` / `timer_<slot>` for
/// callers that pass no name.
pub fn default_name(prefix: &str, slot: usize) -> Name {
    use core::fmt::Write;
    let mut n = Name::new();
    let _ = write!(n, "{}_{}", prefix, slot);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_none_is_recognizable() {
        assert!(Handle::NONE.is_none());
        assert!(!Handle { index: 0, generation: 0 }.is_none());
    }

    #[test]
    fn higher_numbered_priority_is_more_important() {
        assert!(Priority(31).is_more_important_than(Priority(0)));
        assert!(!Priority(0).is_more_important_than(Priority(31)));
    }

    #[test]
    fn default_name_is_bounded() {
        let n = default_name("task", 3);
        assert_eq!(n.as_str(), "task_3");
    }
}
