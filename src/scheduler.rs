//! The public entry point.

use crate::config::{Config, DEFAULT_QUEUE};
use crate::error::{BoxError, Result};
use crate::executor::{CpuPool, WorkerPool};
use crate::future::{TaskFuture, TaskInfo};
use crate::listener::{ListenerRegistry, TaskListener};
use crate::queue::serial::{Dispatcher, Unit};
use crate::queue::{QueueManager, SerialExecutor};
use std::sync::Arc;

struct Inner {
    queues: QueueManager,
    listeners: Arc<ListenerRegistry>,
    default_queue: Arc<str>,
}

/// Schedules tasks onto named serial queues backed by a shared worker pool.
///
/// Tasks in the same queue run one at a time in submission order; tasks in
/// different queues run concurrently, limited only by the pool. The handle is
/// cheap to clone and every clone drives the same queues and listeners.
///
/// ```no_run
/// use seriate::{BoxError, Scheduler};
///
/// let scheduler = Scheduler::new()?;
/// let upload = scheduler.schedule_in("uploads", || Ok::<_, BoxError>(42))?;
/// assert_eq!(upload.get().unwrap(), 42);
/// # Ok::<(), seriate::Error>(())
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Scheduler on a fresh [`CpuPool`] sized from the default config.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = CpuPool::new(&config)?;
        Ok(Self::build(Arc::new(pool), &config.default_queue))
    }

    /// Scheduler on a pool supplied by the host.
    pub fn with_pool(pool: Arc<dyn WorkerPool>) -> Self {
        Self::build(pool, DEFAULT_QUEUE)
    }

    fn build(pool: Arc<dyn WorkerPool>, default_queue: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: QueueManager::new(pool),
                listeners: Arc::new(ListenerRegistry::new()),
                default_queue: Arc::from(default_queue),
            }),
        }
    }

    pub fn default_queue(&self) -> &str {
        &self.inner.default_queue
    }

    /// Schedule `task` on the default queue.
    pub fn schedule<T, E, F>(&self, task: F) -> TaskFuture<T>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let dispatcher = self.inner.queues.get_or_create(&self.inner.default_queue);
        self.submit(Some(dispatcher), task)
    }

    /// Schedule `task` on queue `queue`. Empty names are rejected.
    pub fn schedule_in<T, E, F>(&self, queue: &str, task: F) -> Result<TaskFuture<T>>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let dispatcher = self.inner.queues.dispatcher(queue)?;
        Ok(self.submit(Some(dispatcher), task))
    }

    /// Schedule `task` outside every queue. It is ordered against nothing.
    pub fn schedule_unqueued<T, E, F>(&self, task: F) -> TaskFuture<T>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        self.submit(None, task)
    }

    fn submit<T, E, F>(&self, dispatcher: Option<Arc<Dispatcher>>, task: F) -> TaskFuture<T>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let queue = dispatcher.as_ref().map(|d| d.name().clone());

        let (future, job) = TaskFuture::new(
            TaskInfo::new(queue),
            self.inner.listeners.clone(),
            dispatcher.as_ref().map(Arc::downgrade),
            Box::new(move || task().map_err(Into::into)),
        );
        future.mark_scheduled();

        match dispatcher {
            Some(dispatcher) => dispatcher.submit(Unit::keyed(future.id(), job)),
            None => self.inner.queues.submit_unqueued(job),
        }

        future
    }

    /// Serial submission handle for `queue`; `None` means the default queue.
    pub fn executor(&self, queue: Option<&str>) -> Result<SerialExecutor> {
        let name = queue.unwrap_or(self.default_queue());
        self.inner.queues.executor(name)
    }

    /// Cancel everything still waiting in `queue`. Returns how many units were
    /// removed; the task already running there, if any, is not affected.
    pub fn clear(&self, queue: &str) -> Result<usize> {
        self.inner.queues.clear(queue)
    }

    /// Units waiting in `queue`, not counting the one in flight.
    pub fn pending(&self, queue: &str) -> usize {
        self.inner.queues.pending(queue)
    }

    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) -> Result<()> {
        self.inner.listeners.remove(listener)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    /// Route future dispatches to `pool`. Work already on the old pool stays
    /// there.
    pub fn set_worker_pool(&self, pool: Arc<dyn WorkerPool>) {
        self.inner.queues.set_worker_pool(pool);
    }

    pub fn queues(&self) -> &QueueManager {
        &self.inner.queues
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("default_queue", &self.inner.default_queue)
            .field("queues", &self.inner.queues)
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}
