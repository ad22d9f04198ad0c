//! seriate - named serial queues on a shared worker pool
//!
//! Callers submit tasks tagged with a queue name. Tasks that share a queue run
//! strictly one at a time in submission order; tasks in different queues run
//! concurrently on one worker pool. Every submission returns a [`TaskFuture`]
//! that can be waited on, canceled, or observed, and every task reports its
//! lifecycle to the registered [`TaskListener`]s.
//!
//! # Quick Start
//!
//! ```no_run
//! use seriate::prelude::*;
//!
//! let scheduler = Scheduler::new()?;
//!
//! // Same queue: strictly ordered
//! let a = scheduler.schedule_in("db", || Ok::<_, BoxError>("migrate"))?;
//! let b = scheduler.schedule_in("db", || Ok::<_, BoxError>("seed"))?;
//!
//! // Other queue: runs alongside
//! let c = scheduler.schedule_in("net", || Ok::<_, BoxError>("fetch"))?;
//!
//! assert_eq!(a.get().unwrap(), "migrate");
//! assert_eq!(b.get().unwrap(), "seed");
//! assert_eq!(c.get().unwrap(), "fetch");
//! # Ok::<(), seriate::Error>(())
//! ```
//!
//! # Features
//!
//! - **Serial queues**: at most one task per queue name in flight, FIFO order
//! - **Shared pool**: work-stealing [`CpuPool`] by default, or any [`WorkerPool`]
//! - **Task futures**: blocking `get`, cancellation, one-shot observers
//! - **Listeners**: schedule/start/finish/cancel/error events for every task
//! - **Host hooks**: pool replacement, [`ActivityTracker`], process-wide slot

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod listener;
pub mod prelude;
pub mod queue;
pub mod runtime;
pub mod scheduler;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder, DEFAULT_QUEUE};
pub use error::{BoxError, Error, Result, TaskError};
pub use executor::{CpuPool, Job, PanicStrategy, WorkerPool};
pub use future::{interrupted, observer, FutureObserver, TaskFuture, TaskId, TaskInfo, TaskState};
pub use listener::{ActivityTracker, ListenerRegistry, LogListener, TaskListener};
pub use queue::{QueueManager, SerialExecutor};
pub use runtime::{init, init_with_config, install, shutdown};
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        let config = Config::builder().num_threads(2).build().unwrap();
        Scheduler::with_config(config).unwrap()
    }

    #[test]
    fn test_schedule_and_get() {
        let scheduler = scheduler();
        let future = scheduler.schedule(|| Ok::<_, BoxError>(2 + 2));
        assert_eq!(future.get_timeout(Duration::from_secs(5)).unwrap(), 4);
        assert_eq!(future.state(), TaskState::Completed);
    }

    #[test]
    fn test_error_round_trip() {
        #[derive(Debug, thiserror::Error)]
        #[error("quota exceeded")]
        struct Quota;

        let scheduler = scheduler();
        let future = scheduler.schedule(|| Err::<(), _>(Quota));

        let err = future.get_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(err.failure().unwrap().downcast_ref::<Quota>().is_some());
    }

    #[test]
    fn test_listener_sees_task() {
        let scheduler = scheduler();
        let tracker = Arc::new(ActivityTracker::new());
        scheduler.add_listener(tracker.clone());

        let future = scheduler.schedule(|| Ok::<_, BoxError>(()));
        future.get_timeout(Duration::from_secs(5)).unwrap();

        assert!(tracker.wait_idle(Duration::from_secs(5)));
    }
}
