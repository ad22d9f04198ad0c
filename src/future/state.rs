//! Task identity and lifecycle states.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What listeners learn about a task: who it is and where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    id: TaskId,
    queue: Option<Arc<str>>,
}

impl TaskInfo {
    pub(crate) fn new(queue: Option<Arc<str>>) -> Self {
        Self {
            id: TaskId::next(),
            queue,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Queue the task was scheduled on; `None` for unqueued tasks.
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }
}

/// Lifecycle of a [`TaskFuture`](super::TaskFuture).
///
/// `Created -> Scheduled -> Running -> {Completed, Failed, Canceled}`, with
/// `Scheduled -> Canceled` for work canceled before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Scheduled = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Canceled = 5,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Created,
            1 => TaskState::Scheduled,
            2 => TaskState::Running,
            3 => TaskState::Completed,
            4 => TaskState::Failed,
            _ => TaskState::Canceled,
        }
    }
}
