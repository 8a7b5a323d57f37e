//! Preemptive substrate: one OS thread per task, real condition variables.
//!
//! This is the POSIX-threads-or-Windows-threads backend. Blocking
//! primitives use `std::sync::Condvar`, so a waiter is woken the instant a
//! signal arrives rather than discovering it on the next poll tick.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard, Once};
use std::time::Instant;

use unwrap_lite::UnwrapLite;

use crate::time::Timestamp;

/// Wraps `std::sync::Mutex`, poisoning converted to a panic-free relock:
/// the OSAL never leaves a lock poisoned by unwinding across it, since
/// primitive callbacks that could panic (timer callbacks, task entry
/// points) run outside any internal lock. If a poison ever does occur it
/// indicates a bug in this crate, not in caller code, so we recover the
/// guard rather than propagate poisoning into unrelated primitives.
pub struct Lock<T>(StdMutex<T>);

pub struct LockGuard<'a, T>(StdMutexGuard<'a, T>);

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self(StdMutex::new(value))
    }

    pub fn lock(&self) -> LockGuard<'_, T> {
        LockGuard(self.0.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl<'a, T> core::ops::Deref for LockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<'a, T> core::ops::DerefMut for LockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Broadcast/signal condition used by every blocking primitive (not-empty,
/// not-full, event-group broadcast, timer control).
pub struct Signal(Condvar);

impl Signal {
    pub fn new() -> Self {
        Self(Condvar::new())
    }

    /// Waits on `guard`'s lock until notified or `deadline` passes.
    /// `deadline` of `None` waits with no timeout. Returns the reacquired
    /// guard and whether the wait ended due to timeout (as opposed to a
    /// notification or spurious wake -- callers always re-check their
    /// predicate regardless).
    pub fn wait_timeout<'a, T>(
        &self,
        guard: LockGuard<'a, T>,
        deadline: Option<Timestamp>,
    ) -> (LockGuard<'a, T>, bool) {
        match deadline {
            None => {
                let g = self.0.wait(guard.0).unwrap_or_else(|p| p.into_inner());
                (LockGuard(g), false)
            }
            Some(deadline) => {
                let now = monotonic_now();
                let remaining = u64::from(deadline) .saturating_sub(u64::from(now));
                let (g, result) = self
                    .0
                    .wait_timeout(guard.0, Duration::from_millis(remaining))
                    .unwrap_or_else(|p| p.into_inner());
                (LockGuard(g), result.timed_out())
            }
        }
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

static CLOCK_START: Once = Once::new();
static CLOCK_START_INSTANT: StdMutex<Option<Instant>> = StdMutex::new(None);

/// Monotonic tick, in milliseconds since the first call into the runtime.
pub fn monotonic_now() -> Timestamp {
    CLOCK_START.call_once(|| {
        *CLOCK_START_INSTANT.lock().unwrap() = Some(Instant::now());
    });
    let start = CLOCK_START_INSTANT.lock().unwrap_lite().unwrap_lite();
    Timestamp::from(start.elapsed().as_millis() as u64)
}

/// Busy-waits for approximately `us` microseconds. Used by `task_delay` and
/// by platform code that needs an ISR-safe delay; on the preemptive
/// substrate a real sleep is available and preferred, but this is kept for
/// symmetry with the cooperative backend and for the ISR-context variants.
pub fn micro_delay(us: u32) {
    let deadline = Instant::now() + Duration::from_micros(u64::from(us));
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Sleeps the calling thread for `ms` milliseconds using the host scheduler,
/// rather than busy-waiting: this is the preemptive substrate's `task_delay`
/// primitive.
pub fn sleep_ms(ms: u32) {
    std::thread::sleep(Duration::from_millis(u64::from(ms)));
}

/// Host substrates have no interrupt concept; `*_from_isr` variants are
/// identical to their task-context counterparts.
pub fn is_isr() -> bool {
    false
}

/// Opaque critical-section token. The enter/exit API pair is not
/// RAII-scoped at the call site (callers hold the section open across
/// arbitrary code, per `lifecycle::enter_critical`/`exit_critical`), so the
/// "global mutex" is a raw test-and-set spinlock rather than a
/// `std::sync::Mutex` guard: there is nowhere to stash a borrowed guard
/// between the two calls without unsafe lifetime extension.
pub struct RawToken(());

static GLOBAL_CRITICAL_LOCK: AtomicBool = AtomicBool::new(false);

pub fn raw_critical_acquire() -> RawToken {
    while GLOBAL_CRITICAL_LOCK
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        std::hint::spin_loop();
    }
    RawToken(())
}

pub fn raw_critical_release(token: RawToken) {
    let RawToken(()) = token;
    GLOBAL_CRITICAL_LOCK.store(false, Ordering::Release);
}

/// A spawned task's join handle.
pub struct JoinHandle(std::thread::JoinHandle<()>);

impl JoinHandle {
    pub fn join(self) {
        let _ = self.0.join();
    }
}

/// Spawns a task entry point on its own OS thread. `stack_size` is honored
/// where the host allows configuring it (POSIX and Windows threads both
/// do); `name` is used for debugger/OS-level thread naming only, the OSAL
/// keeps its own copy for `task_get_name`.
pub fn spawn(
    name: &str,
    stack_size: Option<usize>,
    entry: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle, ()> {
    let mut builder = std::thread::Builder::new().name(name.to_string());
    if let Some(sz) = stack_size {
        builder = builder.stack_size(sz);
    }
    builder.spawn(entry).map(JoinHandle).map_err(|_| ())
}

thread_local! {
    static CURRENT_TASK: core::cell::Cell<Option<abi::Handle>> = core::cell::Cell::new(None);
}

pub fn set_current_task(handle: Option<abi::Handle>) {
    CURRENT_TASK.with(|c| c.set(handle));
}

pub fn current_task() -> Option<abi::Handle> {
    CURRENT_TASK.with(|c| c.get())
}

pub fn idle_park() {
    std::thread::sleep(Duration::from_millis(50));
}

/// Hints the host scheduler to run another ready thread. On the preemptive
/// substrate this is a pure hint -- the OS may ignore it -- unlike the
/// cooperative backend's `yield_now`, which must release the run token for
/// a yield to have any effect at all.
pub fn yield_now() {
    std::thread::yield_now();
}
