use super::panic_handler::PanicHandler;
use super::task::{Job, Task};
use super::worker::{Shared, Worker, WorkerId, WorkerState};
use crate::config::Config;
use crate::error::{Error, Result};
use crossbeam_deque::Injector;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Fixed-size work-stealing thread pool.
pub struct CpuPool {
    workers: Vec<WorkerHandle>,
    injector: Arc<Injector<Task>>,
    shutdown: Arc<AtomicBool>,
    num_threads: usize,
    pending_tasks: Arc<AtomicUsize>,
    next_wake: AtomicUsize,
    panic_handler: Arc<PanicHandler>,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
    unparker: thread::Thread,
    state: Arc<WorkerState>,
}

impl CpuPool {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let num_threads = config.worker_threads();
        if num_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending_tasks = Arc::new(AtomicUsize::new(0));
        let panic_handler = Arc::new(PanicHandler::new(config.panic_strategy));

        let workers: Vec<Worker> = (0..num_threads).map(Worker::new).collect();
        let stealers: Vec<_> = workers.iter().map(|w| w.local_queue.stealer()).collect();

        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(num_threads);

        for worker in workers {
            let id = worker.id;
            let state = worker.state.clone();
            let shared = Shared {
                stealers: stealers.clone(),
                injector: injector.clone(),
                shutdown: shutdown.clone(),
                pending_tasks: pending_tasks.clone(),
                panic_handler: panic_handler.clone(),
            };
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || worker.run(shared));

            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    // stop the workers that did start before bailing out
                    shutdown.store(true, Ordering::Release);
                    for handle in handles.iter_mut() {
                        handle.unparker.unpark();
                        if let Some(t) = handle.thread.take() {
                            let _ = t.join();
                        }
                    }
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            };

            let unparker = thread.thread().clone();

            handles.push(WorkerHandle {
                id,
                thread: Some(thread),
                unparker,
                state,
            });
        }

        tracing::debug!(threads = num_threads, prefix = %config.thread_name_prefix, "worker pool started");

        Ok(Self {
            workers: handles,
            injector,
            shutdown,
            num_threads,
            pending_tasks,
            next_wake: AtomicUsize::new(0),
            panic_handler,
        })
    }

    /// Queue a job for execution on some worker.
    pub fn execute(&self, job: Job) {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!("job submitted to a stopped worker pool, dropping it");
            return;
        }

        self.pending_tasks.fetch_add(1, Ordering::Relaxed);
        self.injector.push(Task::new(job));

        let idx = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.num_threads;
        if let Some(worker) = self.workers.get(idx) {
            worker.unparker.unpark();
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.pending_tasks.load(Ordering::Relaxed)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Jobs that unwound on a worker since the pool started.
    pub fn panic_count(&self) -> usize {
        self.panic_handler.caught()
    }

    /// Jobs executed per worker, indexed by worker id.
    pub fn executed_per_worker(&self) -> Vec<(WorkerId, u64)> {
        self.workers
            .iter()
            .map(|w| (w.id, w.state.executed.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // wake everyone up to check shutdown flag
        for worker in &self.workers {
            worker.unparker.unpark();
        }

        let current = thread::current().id();
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                // the last handle may be released from inside a job
                if thread.thread().id() == current {
                    continue;
                }
                let _ = thread.join();
            }
        }

        tracing::debug!(threads = self.num_threads, "worker pool stopped");
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CpuPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuPool")
            .field("num_threads", &self.num_threads)
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn pool(threads: usize) -> CpuPool {
        let config = Config::builder().num_threads(threads).build().unwrap();
        CpuPool::new(&config).unwrap()
    }

    #[test]
    fn test_runs_jobs() {
        let mut pool = pool(2);
        let (tx, rx) = unbounded();

        for i in 0..20 {
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }

        let mut got: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..20).collect::<Vec<_>>());

        pool.shutdown();
        let executed: u64 = pool.executed_per_worker().iter().map(|(_, n)| n).sum();
        assert_eq!(executed, 20);
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let pool = pool(1);
        let (tx, rx) = unbounded();

        pool.execute(Box::new(|| panic!("boom")));
        pool.execute(Box::new(move || {
            tx.send(()).unwrap();
        }));

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(pool.panic_count(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut pool = pool(2);
        assert_eq!(pool.num_threads(), 2);
        pool.shutdown();
        pool.shutdown();
        pool.execute(Box::new(|| {}));
        assert_eq!(pool.pending_tasks(), 0);
    }
}
