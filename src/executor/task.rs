use std::sync::atomic::{AtomicU64, Ordering};

/// Unit of work handed to a [`WorkerPool`](super::WorkerPool).
pub type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// A job as it sits in the pool's deques. `seq` only labels log lines.
pub(crate) struct Task {
    pub(crate) seq: u64,
    job: Job,
}

impl Task {
    pub(crate) fn new(job: Job) -> Self {
        Task {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            job,
        }
    }

    pub(crate) fn run(self) {
        (self.job)();
    }
}
