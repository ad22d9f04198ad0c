//! Worker pool infrastructure.
//!
//! The scheduling core only needs one capability from a pool: accept a job and
//! run it at some point on some thread. [`WorkerPool`] names that capability;
//! [`CpuPool`] is the work-stealing thread pool used when a host does not
//! supply its own.

pub mod cpu_pool;
pub mod panic_handler;
pub mod task;
pub mod worker;

pub use cpu_pool::CpuPool;
pub use panic_handler::PanicStrategy;
pub use task::Job;

pub(crate) use panic_handler::panic_message;

/// Shared execution resource that runs jobs.
///
/// Implementations must be callable from any thread and must not run the job
/// while holding a lock the job might need.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, job: Job);
}

impl<F> WorkerPool for F
where
    F: Fn(Job) + Send + Sync,
{
    fn submit(&self, job: Job) {
        self(job)
    }
}

impl WorkerPool for CpuPool {
    fn submit(&self, job: Job) {
        self.execute(job);
    }
}
