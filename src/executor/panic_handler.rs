//! Panic containment for raw pool jobs.
//!
//! Task bodies scheduled through a [`Scheduler`](crate::Scheduler) catch
//! their own panics and report them as [`TaskError::Panicked`](crate::TaskError).
//! What reaches this layer is a job handed straight to the pool, or a bug in a
//! [`SerialExecutor`](crate::SerialExecutor) closure.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a worker does when a job unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    /// Abort the process.
    Abort,
    /// Swallow the panic silently.
    Isolate,
    /// Log it with `tracing::warn!` and keep the worker running.
    #[default]
    LogAndContinue,
}

#[derive(Debug)]
pub(crate) struct PanicHandler {
    strategy: PanicStrategy,
    caught: AtomicUsize,
}

impl PanicHandler {
    pub(crate) fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            caught: AtomicUsize::new(0),
        }
    }

    /// Run `job`, containing any panic. Returns false if it unwound.
    pub(crate) fn run<F>(&self, worker: usize, job: F) -> bool
    where
        F: FnOnce(),
    {
        let payload = match catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => return true,
            Err(payload) => payload,
        };

        self.caught.fetch_add(1, Ordering::Relaxed);
        let message = panic_message(payload.as_ref());

        match self.strategy {
            PanicStrategy::Abort => {
                tracing::error!(worker, %message, "job panicked, aborting");
                std::process::abort();
            }
            PanicStrategy::Isolate => {}
            PanicStrategy::LogAndContinue => {
                tracing::warn!(worker, %message, "job panicked");
            }
        }
        false
    }

    pub(crate) fn caught(&self) -> usize {
        self.caught.load(Ordering::Relaxed)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_counts() {
        let handler = PanicHandler::new(PanicStrategy::Isolate);

        assert!(handler.run(0, || {}));
        assert!(!handler.run(0, || panic!("worker job")));
        assert!(!handler.run(1, || std::panic::panic_any(7u8)));

        assert_eq!(handler.caught(), 2);
    }

    #[test]
    fn test_panic_message() {
        let owned = catch_unwind(|| panic!("code {}", 42)).unwrap_err();
        let fixed = catch_unwind(|| panic!("fixed")).unwrap_err();
        let opaque = catch_unwind(|| std::panic::panic_any(3.5f64)).unwrap_err();

        assert_eq!(panic_message(owned.as_ref()), "code 42");
        assert_eq!(panic_message(fixed.as_ref()), "fixed");
        assert_eq!(panic_message(opaque.as_ref()), "non-string panic payload");
    }
}
