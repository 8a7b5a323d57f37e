//! Cooperative substrate: round-robin dispatch, busy-polling wakeups.
//!
//! There is conceptually a single dispatch thread rotating through ready
//! tasks; a task keeps the CPU until it calls a blocking primitive, delays,
//! or yields. On real bare-metal hardware that single dispatch thread would
//! be realized with a genuine stackful context switch the way the kernel's
//! `arch::arm_m` swaps `SavedState` on the real Cortex-M stack. A portable,
//! `unsafe`-asm-free Rust crate can't reach into an arbitrary call stack to
//! suspend it, so this module instead runs each task on its own OS thread
//! and arbitrates a single "run token": exactly one task thread may be
//! executing task code at any instant, and every suspension point (wait,
//! delay, yield) releases the token before parking and reacquires it before
//! resuming. The result is the same *observable* contract as a true
//! cooperative scheduler -- one task makes progress at a time, switches only
//! happen at explicit suspension points, priority is recorded but not
//! honored -- over a mechanism that is portable and host-testable.
//!
//! Blocking primitives degrade to polling the run token's predicate at
//! [`super::POLL_GRANULARITY_MS`] granularity, this substrate's timing
//! floor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard as StdMutexGuard;
use std::time::{Duration, Instant};

use crate::time::Timestamp;

static RUN_TOKEN: AtomicBool = AtomicBool::new(false);

fn acquire_run_token() {
    while RUN_TOKEN
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        std::thread::yield_now();
    }
}

fn release_run_token() {
    RUN_TOKEN.store(false, Ordering::Release);
}

pub struct Lock<T>(StdMutex<T>);

/// Carries a reference back to its originating [`Lock`] (unlike the
/// preemptive backend's guard) so [`Signal::wait_timeout`] can drop and
/// later reacquire it across the poll sleep without borrowing a guard past
/// its lifetime.
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
    guard: StdMutexGuard<'a, T>,
}

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self(StdMutex::new(value))
    }

    pub fn lock(&self) -> LockGuard<'_, T> {
        LockGuard {
            lock: self,
            guard: self.0.lock().unwrap_or_else(|p| p.into_inner()),
        }
    }
}

impl<'a, T> core::ops::Deref for LockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> core::ops::DerefMut for LockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Polling stand-in for a condition variable. `notify_*` are accepted for
/// API symmetry with the preemptive backend but are no-ops: a waiter
/// discovers state changes by re-polling, never by being woken directly.
pub struct Signal;

impl Signal {
    pub fn new() -> Self {
        Self
    }

    pub fn wait_timeout<'a, T>(
        &self,
        guard: LockGuard<'a, T>,
        deadline: Option<Timestamp>,
    ) -> (LockGuard<'a, T>, bool) {
        let lock = guard.lock;
        drop(guard);
        release_run_token();
        std::thread::sleep(Duration::from_millis(u64::from(super::POLL_GRANULARITY_MS)));
        acquire_run_token();
        let timed_out = match deadline {
            None => false,
            Some(d) => u64::from(monotonic_now()) >= u64::from(d),
        };
        (lock.lock(), timed_out)
    }

    pub fn notify_one(&self) {}
    pub fn notify_all(&self) {}
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

static CLOCK_START: StdMutex<Option<Instant>> = StdMutex::new(None);

pub fn monotonic_now() -> Timestamp {
    let mut start = CLOCK_START.lock().unwrap_or_else(|p| p.into_inner());
    let start = *start.get_or_insert_with(Instant::now);
    Timestamp::from(start.elapsed().as_millis() as u64)
}

/// Busy-waits approximately `us` microseconds without releasing the run
/// token: a true spin, since cooperative `task_delay` at microsecond
/// granularity does not hand the CPU to the dispatcher.
pub fn micro_delay(us: u32) {
    let deadline = Instant::now() + Duration::from_micros(u64::from(us));
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Sleeps by busy-waiting `ms` milliseconds in `1000 * ms` microsecond
/// units. Unlike
/// [`micro_delay`], this releases the run token between checks so other
/// tasks' suspension points (themselves waiting on the token) can make
/// progress; on genuinely single-core bare metal a delay blocks everything
/// regardless, since there is nothing else to run.
pub fn sleep_ms(ms: u32) {
    release_run_token();
    micro_delay(ms.saturating_mul(1000));
    acquire_run_token();
}

pub fn is_isr() -> bool {
    false
}

/// Host substrates have no interrupt mask to save/restore; our
/// `critical_section::Impl` below (grounded on the kernel's own
/// no-op Hubris-task impl) just takes the global critical lock, so the
/// restore state carries nothing.
struct HostCriticalSection;
critical_section::set_impl!(HostCriticalSection);

static CRITICAL_LOCK: AtomicBool = AtomicBool::new(false);

unsafe impl critical_section::Impl for HostCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        while CRITICAL_LOCK
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        0
    }

    unsafe fn release(_token: critical_section::RawRestoreState) {
        CRITICAL_LOCK.store(false, Ordering::Release);
    }
}

pub struct RawToken(critical_section::RestoreState);

pub fn raw_critical_acquire() -> RawToken {
    RawToken(unsafe { critical_section::acquire() })
}

pub fn raw_critical_release(token: RawToken) {
    unsafe { critical_section::release(token.0) };
}

pub struct JoinHandle(std::thread::JoinHandle<()>);

impl JoinHandle {
    pub fn join(self) {
        let _ = self.0.join();
    }
}

pub fn spawn(
    name: &str,
    stack_size: Option<usize>,
    entry: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle, ()> {
    let mut builder = std::thread::Builder::new().name(name.to_string());
    if let Some(sz) = stack_size {
        builder = builder.stack_size(sz);
    }
    builder
        .spawn(move || {
            acquire_run_token();
            entry();
            release_run_token();
        })
        .map(JoinHandle)
        .map_err(|_| ())
}

/// Cooperative `task_yield`: hand the run token to whichever task acquires
/// it next (round-robin, since acquisition order among parked threads is
/// FIFO-ish under the host scheduler) and take a fresh turn afterward.
pub fn yield_now() {
    release_run_token();
    std::thread::yield_now();
    acquire_run_token();
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
