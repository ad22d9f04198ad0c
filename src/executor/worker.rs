// worker thread stuff
use super::panic_handler::PanicHandler;
use super::task::Task;
use crossbeam_deque::{Injector, Stealer, Worker as WorkerQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type WorkerId = usize;

// jobs run by each worker, panicked or not
#[derive(Debug, Default)]
pub(crate) struct WorkerState {
    pub executed: AtomicU64,
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub local_queue: WorkerQueue<Task>,
    pub state: Arc<WorkerState>,
}

/// Everything a worker loop shares with the pool.
pub(crate) struct Shared {
    pub stealers: Vec<Stealer<Task>>,
    pub injector: Arc<Injector<Task>>,
    pub shutdown: Arc<AtomicBool>,
    pub pending_tasks: Arc<AtomicUsize>,
    pub panic_handler: Arc<PanicHandler>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            local_queue: WorkerQueue::new_fifo(),
            state: Arc::new(WorkerState::default()),
        }
    }

    // main loop
    pub fn run(&self, shared: Shared) {
        let mut backoff_cnt = 0;

        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            // local -> global -> steal
            if let Some(task) = self.find_task(&shared.stealers, &shared.injector) {
                backoff_cnt = 0;
                self.execute_task(task, &shared.panic_handler);
                shared.pending_tasks.fetch_sub(1, Ordering::Relaxed);
            } else {
                self.backoff(&mut backoff_cnt);
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn find_task(&self, stealers: &[Stealer<Task>], injector: &Injector<Task>) -> Option<Task> {
        if let Some(task) = self.local_queue.pop() {
            return Some(task);
        }

        loop {
            match injector.steal_batch_and_pop(&self.local_queue) {
                crossbeam_deque::Steal::Success(task) => return Some(task),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        self.try_steal_from_workers(stealers)
    }

    fn try_steal_from_workers(&self, stealers: &[Stealer<Task>]) -> Option<Task> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        if stealers.len() < 2 {
            return None;
        }

        let mut indices: Vec<usize> = (0..stealers.len()).collect();
        indices.shuffle(&mut thread_rng());

        for &idx in &indices {
            if idx == self.id {
                continue;
            }

            loop {
                match stealers[idx].steal_batch_and_pop(&self.local_queue) {
                    crossbeam_deque::Steal::Success(task) => return Some(task),
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn execute_task(&self, task: Task, panic_handler: &PanicHandler) {
        let seq = task.seq;

        if !panic_handler.run(self.id, || task.run()) {
            tracing::debug!(worker = self.id, job = seq, "job unwound");
        }

        self.state.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn backoff(&self, count: &mut u32) {
        const MAX_SPINS: u32 = 10;
        const MAX_YIELDS: u32 = 20;

        *count += 1;

        if *count <= MAX_SPINS {
            let spins = (*count).min(6);
            for _ in 0..(1 << spins) {
                std::hint::spin_loop();
            }
        } else if *count <= MAX_YIELDS {
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_millis(1));
        }
    }
}
