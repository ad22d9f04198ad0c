//! Named queues over a shared worker pool.

pub mod serial;

pub use serial::SerialExecutor;

use crate::error::{Error, Result};
use crate::executor::{Job, WorkerPool};
use parking_lot::{Mutex, RwLock};
use serial::Dispatcher;
use std::collections::HashMap;
use std::sync::Arc;

/// The pool every dispatcher submits to. Swapping it only affects jobs
/// dispatched afterwards.
pub(crate) struct PoolSlot {
    pool: RwLock<Arc<dyn WorkerPool>>,
}

impl PoolSlot {
    pub(crate) fn new(pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            pool: RwLock::new(pool),
        }
    }

    pub(crate) fn current(&self) -> Arc<dyn WorkerPool> {
        self.pool.read().clone()
    }

    fn replace(&self, pool: Arc<dyn WorkerPool>) -> Arc<dyn WorkerPool> {
        std::mem::replace(&mut *self.pool.write(), pool)
    }
}

/// Owns one serial dispatcher per queue name.
///
/// Dispatchers are created on first use and kept for the manager's lifetime;
/// an idle one is just an empty deque and a flag.
pub struct QueueManager {
    queues: Mutex<HashMap<Arc<str>, Arc<Dispatcher>>>,
    pool: Arc<PoolSlot>,
}

impl QueueManager {
    pub fn new(pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            pool: Arc::new(PoolSlot::new(pool)),
        }
    }

    /// Serial submission handle for `name`, creating the queue if needed.
    pub fn executor(&self, name: &str) -> Result<SerialExecutor> {
        Ok(SerialExecutor::new(self.dispatcher(name)?))
    }

    pub(crate) fn dispatcher(&self, name: &str) -> Result<Arc<Dispatcher>> {
        validate_name(name)?;
        Ok(self.get_or_create(name))
    }

    // `name` must already be validated.
    pub(crate) fn get_or_create(&self, name: &str) -> Arc<Dispatcher> {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get(name) {
            return queue.clone();
        }

        let name: Arc<str> = Arc::from(name);
        let queue = Arc::new(Dispatcher::new(name.clone(), self.pool.clone()));
        queues.insert(name, queue.clone());
        tracing::debug!(queue = %queue.name(), "queue created");
        queue
    }

    /// Hand `job` straight to the pool, outside every queue.
    pub fn submit_unqueued(&self, job: Job) {
        self.pool.current().submit(job);
    }

    /// Replace the worker pool. Jobs already handed to the old pool stay there.
    pub fn set_worker_pool(&self, pool: Arc<dyn WorkerPool>) {
        let old = self.pool.replace(pool);
        tracing::debug!("worker pool replaced");
        // the old pool may join its threads on drop; do it outside the lock
        drop(old);
    }

    pub fn worker_pool(&self) -> Arc<dyn WorkerPool> {
        self.pool.current()
    }

    /// Remove every pending unit of queue `name`.
    ///
    /// Units backed by a future are canceled, firing their cancel event. The
    /// unit currently on the pool, if any, is left to finish. Returns the number
    /// of units removed.
    pub fn clear(&self, name: &str) -> Result<usize> {
        validate_name(name)?;

        let queue = self.queues.lock().get(name).cloned();
        let removed = match queue {
            Some(queue) => queue.drain(),
            None => return Ok(0),
        };

        let count = removed.len();
        // dropping an unrun unit cancels its future
        drop(removed);

        tracing::debug!(queue = name, removed = count, "queue cleared");
        Ok(count)
    }

    /// Units waiting in `name`, not counting the one in flight.
    pub fn pending(&self, name: &str) -> usize {
        self.queues
            .lock()
            .get(name)
            .map(|q| q.pending())
            .unwrap_or(0)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queues", &self.queue_names())
            .finish()
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("queue name must not be empty"));
    }
    Ok(())
}
