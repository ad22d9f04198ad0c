pub use crate::config::{Config, ConfigBuilder, DEFAULT_QUEUE};
pub use crate::error::{BoxError, Error, Result, TaskError};
pub use crate::executor::{CpuPool, PanicStrategy, WorkerPool};
pub use crate::future::{interrupted, observer, FutureObserver, TaskFuture, TaskState};
pub use crate::listener::{ActivityTracker, LogListener, TaskListener};
pub use crate::queue::SerialExecutor;
pub use crate::scheduler::Scheduler;
