//! # LogListener
//!
//! Writes every lifecycle event through `tracing`.
//!
//! ```text
//! DEBUG task scheduled task=task-7 queue=Some("uploads")
//! DEBUG task started task=task-7
//! DEBUG task finished task=task-7
//! WARN  task failed task=task-8 error=task failed: connection refused
//! DEBUG task canceled task=task-9
//! ```

use super::TaskListener;
use crate::error::TaskError;
use crate::future::TaskInfo;
use std::any::Any;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl LogListener {
    pub fn new() -> Self {
        Self
    }
}

impl TaskListener for LogListener {
    fn on_schedule(&self, task: &TaskInfo) {
        tracing::debug!(task = %task.id(), queue = ?task.queue(), "task scheduled");
    }

    fn on_start(&self, task: &TaskInfo) {
        tracing::debug!(task = %task.id(), "task started");
    }

    fn on_finish(&self, task: &TaskInfo, _result: &dyn Any) {
        tracing::debug!(task = %task.id(), "task finished");
    }

    fn on_cancel(&self, task: &TaskInfo) {
        tracing::debug!(task = %task.id(), "task canceled");
    }

    fn on_error(&self, task: &TaskInfo, error: &TaskError) {
        tracing::warn!(task = %task.id(), %error, "task failed");
    }
}
