//! Active task counter.
//!
//! A host that keeps a process or service alive while work is pending registers
//! an [`ActivityTracker`] and waits for it to go idle before shutting down.

use super::TaskListener;
use crate::error::TaskError;
use crate::future::{TaskId, TaskInfo};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Tracks tasks that were scheduled and have not reached a terminal event.
///
/// Only tasks whose `scheduled` event the tracker saw are counted. Tasks that
/// were already in flight when the tracker was registered come and go
/// unnoticed.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    active: Mutex<HashSet<TaskId>>,
    idle: Condvar,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.lock().is_empty()
    }

    /// Block until no task is active. Returns false on timeout.
    ///
    /// A timeout too large to represent as a deadline waits without one.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut active = self.active.lock();
        while !active.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut active, deadline).timed_out() {
                        return active.is_empty();
                    }
                }
                None => self.idle.wait(&mut active),
            }
        }
        true
    }

    fn task_done(&self, task: &TaskInfo) {
        let mut active = self.active.lock();
        if active.remove(&task.id()) && active.is_empty() {
            self.idle.notify_all();
        }
    }
}

impl TaskListener for ActivityTracker {
    fn on_schedule(&self, task: &TaskInfo) {
        self.active.lock().insert(task.id());
    }

    fn on_finish(&self, task: &TaskInfo, _result: &dyn Any) {
        self.task_done(task);
    }

    fn on_cancel(&self, task: &TaskInfo) {
        self.task_done(task);
    }

    fn on_error(&self, task: &TaskInfo, _error: &TaskError) {
        self.task_done(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counts_until_terminal() {
        let tracker = ActivityTracker::new();
        let a = TaskInfo::new(None);
        let b = TaskInfo::new(None);

        tracker.on_schedule(&a);
        tracker.on_schedule(&b);
        tracker.on_start(&a);
        assert_eq!(tracker.active(), 2);

        tracker.on_finish(&a, &1u8);
        tracker.on_cancel(&b);
        assert!(tracker.is_idle());

        tracker.on_cancel(&b);
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn test_ignores_tasks_scheduled_before_registration() {
        let tracker = ActivityTracker::new();
        let earlier = TaskInfo::new(Some(Arc::from("a")));
        let tracked = TaskInfo::new(Some(Arc::from("b")));

        tracker.on_schedule(&tracked);
        tracker.on_start(&earlier);
        tracker.on_finish(&earlier, &());

        assert_eq!(tracker.active(), 1);
        assert!(!tracker.is_idle());
        assert!(!tracker.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_idle() {
        let tracker = Arc::new(ActivityTracker::new());
        let task = TaskInfo::new(None);
        tracker.on_schedule(&task);

        assert!(!tracker.wait_idle(Duration::from_millis(10)));

        let t = tracker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.on_error(&task, &TaskError::Panicked("x".into()));
        });

        assert!(tracker.wait_idle(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_idle_without_deadline() {
        let tracker = Arc::new(ActivityTracker::new());
        assert!(tracker.wait_idle(Duration::MAX));

        let task = TaskInfo::new(None);
        tracker.on_schedule(&task);

        let t = tracker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.on_cancel(&task);
        });

        assert!(tracker.wait_idle(Duration::MAX));
        handle.join().unwrap();
    }
}
