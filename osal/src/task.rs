//! Task Manager: a TCB per spawned substrate thread, routed through TLS for
//! `get_current`, with suspend/resume observed only at explicit yield/delay
//! points -- the same "suspend is advisory until the target reaches a safe
//! point" posture applied to `task_delete`.

use abi::{Handle, Priority, Status, TaskFlags};

use crate::backend::{Lock, Signal};
use crate::registry::Pool;

pub type TaskEntry = fn(usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskConfig {
    pub entry: Option<TaskEntry>,
    pub arg: usize,
    pub priority: Priority,
    pub stack_size: Option<usize>,
    pub flags: TaskFlags,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            entry: None,
            arg: 0,
            priority: Priority::MIN,
            stack_size: None,
            flags: TaskFlags::empty(),
        }
    }
}

struct TaskControl {
    running: bool,
    suspended: bool,
    delete_pending: bool,
    reap_self: bool,
    name: abi::Name,
    priority: Priority,
}

pub struct Task {
    control: Lock<TaskControl>,
    state_changed: Signal,
    join: Lock<Option<crate::backend::JoinHandle>>,
}

static TASKS: std::sync::OnceLock<Pool<Task, { abi::defaults::TASKS }>> =
    std::sync::OnceLock::new();

fn tasks() -> &'static Pool<Task, { abi::defaults::TASKS }> {
    TASKS.get_or_init(Pool::empty)
}

ringbuf::ringbuf!(TASK_EVENTS, TaskEvent, 32, TaskEvent::None);

#[derive(Copy, Clone, PartialEq)]
enum TaskEvent {
    None,
    Created(Handle),
    Suspended(Handle),
    Resumed(Handle),
    Exited(Handle),
    Deleted(Handle),
}

pub fn create(config: TaskConfig, name: Option<&str>) -> Result<Handle, Status> {
    let entry = config.entry.ok_or(Status::NullPointer)?;
    if !config.priority.is_valid() {
        return Err(Status::InvalidParam);
    }
    crate::lifecycle::init();

    let task = Task {
        control: Lock::new(TaskControl {
            running: true,
            suspended: config.flags.contains(TaskFlags::START_SUSPENDED),
            delete_pending: false,
            reap_self: false,
            name: abi::Name::new(),
            priority: config.priority,
        }),
        state_changed: Signal::new(),
        join: Lock::new(None),
    };
    let handle = tasks().insert(task).ok_or(Status::NoMemory)?;

    let bound_name = name
        .and_then(|n| n.parse::<abi::Name>().ok())
        .unwrap_or_else(|| abi::default_name("task", handle.index as usize));
    let _ = tasks().with(handle, |t| {
        t.control.lock().name = bound_name;
    });

    let arg = config.arg;
    let spawned = crate::backend::spawn(
        bound_name_as_str(handle).as_deref().unwrap_or("task"),
        config.stack_size,
        move || task_thread_main(handle, entry, arg),
    );

    match spawned {
        Ok(join_handle) => {
            let _ = tasks().with(handle, |t| {
                *t.join.lock() = Some(join_handle);
            });
            ringbuf::ringbuf_entry!(TASK_EVENTS, TaskEvent::Created(handle));
            Ok(handle)
        }
        Err(()) => {
            let _ = tasks().remove(handle);
            Err(Status::NoMemory)
        }
    }
}

fn bound_name_as_str(handle: Handle) -> Option<std::string::String> {
    tasks()
        .with(handle, |t| t.control.lock().name.as_str().to_string())
        .ok()
}

fn task_thread_main(handle: Handle, entry: TaskEntry, arg: usize) {
    crate::backend::set_current_task(Some(handle));

    let wait_while_suspended = || {
        let _ = tasks().with(handle, |t| {
            let mut guard = t.control.lock();
            while guard.suspended && !guard.delete_pending {
                let (g, _) = t.state_changed.wait_timeout(guard, None);
                guard = g;
            }
        });
    };
    wait_while_suspended();

    let delete_pending = tasks()
        .with(handle, |t| t.control.lock().delete_pending)
        .unwrap_or(true);
    if !delete_pending {
        entry(arg);
    }

    let _ = tasks().with(handle, |t| {
        t.control.lock().running = false;
    });
    ringbuf::ringbuf_entry!(TASK_EVENTS, TaskEvent::Exited(handle));

    // A self-deleted task is never joined or reclaimed by anyone else --
    // `delete`'s self-delete path returns immediately without touching the
    // pool slot. Reap it here, now that the thread has actually finished.
    let reap_self = tasks()
        .with(handle, |t| t.control.lock().reap_self)
        .unwrap_or(false);
    if reap_self && tasks().remove(handle).is_ok() {
        ringbuf::ringbuf_entry!(TASK_EVENTS, TaskEvent::Deleted(handle));
    }
}

pub fn delete(handle: Handle) -> Result<(), Status> {
    let target = if handle.is_none() {
        crate::backend::current_task().ok_or(Status::InvalidParam)?
    } else {
        handle
    };
    let is_self = crate::backend::current_task() == Some(target);

    tasks().with(target, |t| {
        let mut guard = t.control.lock();
        guard.delete_pending = true;
        guard.suspended = false;
        if is_self {
            guard.reap_self = true;
        }
        drop(guard);
        t.state_changed.notify_all();
    })?;

    if is_self {
        // The calling thread is this very task; it cannot join itself.
        // `task_thread_main`'s epilogue reclaims the slot once the thread
        // actually runs to completion, since no external caller will ever
        // join or remove it.
        return Ok(());
    }

    let join_handle = tasks().with(target, |t| t.join.lock().take())?;
    if let Some(j) = join_handle {
        j.join();
    }
    tasks().remove(target).map(|_| {
        ringbuf::ringbuf_entry!(TASK_EVENTS, TaskEvent::Deleted(target));
    })
}

pub fn suspend(handle: Handle) -> Result<(), Status> {
    tasks().with(handle, |t| {
        t.control.lock().suspended = true;
        ringbuf::ringbuf_entry!(TASK_EVENTS, TaskEvent::Suspended(handle));
    })
}

pub fn resume(handle: Handle) -> Result<(), Status> {
    tasks().with(handle, |t| {
        let mut guard = t.control.lock();
        guard.suspended = false;
        drop(guard);
        t.state_changed.notify_all();
        ringbuf::ringbuf_entry!(TASK_EVENTS, TaskEvent::Resumed(handle));
    })
}

/// Sleeps the calling task for `ms`, then re-checks its own suspend flag and
/// blocks on its condition if set, matching how suspend interacts with an
/// in-progress delay.
pub fn delay(ms: u32) {
    crate::backend::sleep_ms(ms);
    if let Some(handle) = crate::backend::current_task() {
        let _ = tasks().with(handle, |t| {
            let mut guard = t.control.lock();
            while guard.suspended && !guard.delete_pending {
                let (g, _) = t.state_changed.wait_timeout(guard, None);
                guard = g;
            }
        });
    }
}

pub fn task_yield() {
    crate::backend::yield_now();
}

pub fn get_current() -> Option<Handle> {
    crate::backend::current_task()
}

pub fn get_name(handle: Handle) -> Result<abi::Name, Status> {
    tasks().with(handle, |t| t.control.lock().name.clone())
}

pub fn get_priority(handle: Handle) -> Result<Priority, Status> {
    tasks().with(handle, |t| t.control.lock().priority)
}

pub fn is_running(handle: Handle) -> Result<bool, Status> {
    tasks().with(handle, |t| t.control.lock().running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static RAN: AtomicU32 = AtomicU32::new(0);

    fn mark_ran(_arg: usize) {
        RAN.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    #[test]
    fn create_runs_entry_and_reports_name() {
        RAN.store(0, Ordering::SeqCst);
        let h = create(
            TaskConfig {
                entry: Some(mark_ran),
                ..Default::default()
            },
            Some("worker"),
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
        assert_eq!(get_name(h).unwrap().as_str(), "worker");
        delete(h).unwrap();
    }

    #[test]
    fn rejects_null_entry() {
        assert_eq!(
            create(TaskConfig::default(), None).map(|_| ()),
            Err(Status::NullPointer)
        );
    }

    #[test]
    fn rejects_invalid_priority() {
        let cfg = TaskConfig {
            entry: Some(mark_ran),
            priority: Priority(200),
            ..Default::default()
        };
        assert_eq!(create(cfg, None).map(|_| ()), Err(Status::InvalidParam));
    }

    #[test]
    fn start_suspended_does_not_run_until_resumed() {
        RAN.store(0, Ordering::SeqCst);
        let cfg = TaskConfig {
            entry: Some(mark_ran),
            flags: TaskFlags::START_SUSPENDED,
            ..Default::default()
        };
        let h = create(cfg, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(RAN.load(Ordering::SeqCst), 0);
        resume(h).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
        delete(h).unwrap();
    }

    #[test]
    fn double_delete_is_invalid() {
        let h = create(
            TaskConfig {
                entry: Some(mark_ran),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(40));
        delete(h).unwrap();
        assert_eq!(delete(h), Err(Status::InvalidParam));
    }

    fn self_delete_via_null(_arg: usize) {
        delete(Handle::NONE).unwrap();
    }

    #[test]
    fn self_delete_via_null_reclaims_slot() {
        let h = create(
            TaskConfig {
                entry: Some(self_delete_via_null),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(get_name(h), Err(Status::InvalidParam));
    }

    fn self_delete_via_own_handle(_arg: usize) {
        let h = get_current().unwrap();
        delete(h).unwrap();
    }

    #[test]
    fn self_delete_via_own_handle_reclaims_slot() {
        let h = create(
            TaskConfig {
                entry: Some(self_delete_via_own_handle),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(get_name(h), Err(Status::InvalidParam));
    }
}
