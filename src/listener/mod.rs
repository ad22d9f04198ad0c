//! Lifecycle listeners.
//!
//! A [`TaskListener`] sees every task the scheduler handles, whichever queue it
//! ran in. For one task the events arrive in one of these orders:
//!
//! ```text
//! scheduled -> started -> finished
//! scheduled -> started -> errored
//! scheduled -> canceled
//! scheduled -> started -> canceled     (canceled while running)
//! ```
//!
//! Callbacks run on whichever thread drives the transition: the scheduling
//! thread for `scheduled`, a worker for `started`/`finished`/`errored`, the
//! canceling thread for `canceled`. A listener that needs a particular thread
//! must hop there itself.

pub mod activity;
pub mod log;

pub use activity::ActivityTracker;
pub use log::LogListener;

use crate::error::{Error, Result, TaskError};
use crate::executor::panic_message;
use crate::future::TaskInfo;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Observer of task lifecycle events across the whole scheduler.
///
/// The terminal event (`on_finish`, `on_error` or `on_cancel`) is delivered
/// before the task's outcome is published to its [`TaskFuture`]. Calling
/// [`TaskFuture::get`] on the same task from inside one of these callbacks
/// therefore blocks forever; use the `result` or `error` argument instead.
///
/// [`TaskFuture`]: crate::TaskFuture
/// [`TaskFuture::get`]: crate::TaskFuture::get
pub trait TaskListener: Send + Sync {
    fn on_schedule(&self, _task: &TaskInfo) {}

    fn on_start(&self, _task: &TaskInfo) {}

    /// `result` is the task's value; downcast it to the task's output type.
    fn on_finish(&self, _task: &TaskInfo, _result: &dyn Any) {}

    fn on_cancel(&self, _task: &TaskInfo) {}

    fn on_error(&self, _task: &TaskInfo, _error: &TaskError) {}
}

type Snapshot = Arc<Vec<Arc<dyn TaskListener>>>;

/// Thread-safe set of listeners, identified by `Arc` pointer.
///
/// Fan-out works on a snapshot taken at the start of each event, so listeners
/// added or removed mid-dispatch take effect from the next event.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Snapshot>,
}

fn same(a: &Arc<dyn TaskListener>, b: &Arc<dyn TaskListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. Returns false if it was already registered.
    pub fn add(&self, listener: Arc<dyn TaskListener>) -> bool {
        let mut guard = self.listeners.write();
        if guard.iter().any(|l| same(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Unregister `listener`.
    ///
    /// Removing a listener that is not registered is a caller bug and returns
    /// [`Error::UnknownListener`]; the registered set is left untouched.
    pub fn remove(&self, listener: &Arc<dyn TaskListener>) -> Result<()> {
        let mut guard = self.listeners.write();
        let pos = guard
            .iter()
            .position(|l| same(l, listener))
            .ok_or(Error::UnknownListener)?;
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.remove(pos);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn contains(&self, listener: &Arc<dyn TaskListener>) -> bool {
        self.listeners.read().iter().any(|l| same(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub(crate) fn scheduled(&self, task: &TaskInfo) {
        self.emit("schedule", task, |l| l.on_schedule(task));
    }

    pub(crate) fn started(&self, task: &TaskInfo) {
        self.emit("start", task, |l| l.on_start(task));
    }

    pub(crate) fn finished(&self, task: &TaskInfo, result: &dyn Any) {
        self.emit("finish", task, |l| l.on_finish(task, result));
    }

    pub(crate) fn canceled(&self, task: &TaskInfo) {
        self.emit("cancel", task, |l| l.on_cancel(task));
    }

    pub(crate) fn errored(&self, task: &TaskInfo, error: &TaskError) {
        self.emit("error", task, |l| l.on_error(task, error));
    }

    fn emit<F>(&self, event: &'static str, task: &TaskInfo, f: F)
    where
        F: Fn(&dyn TaskListener),
    {
        let snapshot = self.listeners.read().clone();
        for listener in snapshot.iter() {
            // one bad listener must not starve the rest
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                tracing::warn!(
                    event = event,
                    task = %task.id(),
                    message = %panic_message(payload.as_ref()),
                    "task listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
