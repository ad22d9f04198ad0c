use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error accepted from task bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Misuse of the scheduler API. Always reported at the call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("listener is not registered")]
    UnknownListener,

    #[error("scheduler not initialized")]
    NotInitialized,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("config error: {0}")]
    Config(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }
}

/// Outcome of a task that did not produce a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was canceled")]
    Canceled,

    #[error("timed out waiting for task")]
    Timeout,
}

impl TaskError {
    pub(crate) fn failed(err: BoxError) -> Self {
        TaskError::Failed(Arc::from(err))
    }

    /// The error raised by the task body, if the task failed with one.
    ///
    /// Use `downcast_ref` on the returned value to recover the concrete type.
    pub fn failure(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            TaskError::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout)
    }
}
