//! Process-wide scheduler slot.
//!
//! The core never reaches for this slot itself; it exists for the host
//! boundary, where one scheduler is shared by every component of a process.
//! Everything else should be handed a [`Scheduler`] explicitly.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use parking_lot::RwLock;

static GLOBAL_SCHEDULER: RwLock<Option<Scheduler>> = RwLock::new(None);

pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

pub fn init_with_config(config: Config) -> Result<()> {
    let mut slot = GLOBAL_SCHEDULER.write();

    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    *slot = Some(Scheduler::with_config(config)?);
    tracing::debug!("global scheduler initialized");
    Ok(())
}

/// Publish a scheduler the host built itself, e.g. on its own pool.
pub fn install(scheduler: Scheduler) -> Result<()> {
    let mut slot = GLOBAL_SCHEDULER.write();

    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    *slot = Some(scheduler);
    Ok(())
}

/// The installed scheduler, or [`Error::NotInitialized`].
pub fn current() -> Result<Scheduler> {
    GLOBAL_SCHEDULER
        .read()
        .as_ref()
        .cloned()
        .ok_or(Error::NotInitialized)
}

pub fn is_initialized() -> bool {
    GLOBAL_SCHEDULER.read().is_some()
}

/// Empty the slot and hand back what was in it.
///
/// The pool shuts down once the last clone of the returned scheduler is gone.
pub fn shutdown() -> Option<Scheduler> {
    let taken = GLOBAL_SCHEDULER.write().take();
    if taken.is_some() {
        tracing::debug!("global scheduler released");
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    // One test drives the whole lifecycle; the slot is process-global.
    #[test]
    fn test_slot_lifecycle() {
        shutdown();
        assert!(matches!(current(), Err(Error::NotInitialized)));

        let config = Config::builder().num_threads(2).build().unwrap();
        init_with_config(config).unwrap();
        assert!(is_initialized());
        assert!(matches!(init(), Err(Error::AlreadyInitialized)));

        let scheduler = current().unwrap();
        let answer = scheduler.schedule(|| Ok::<_, BoxError>(42));
        assert_eq!(answer.get().unwrap(), 42);

        assert!(shutdown().is_some());
        assert!(shutdown().is_none());

        install(scheduler).unwrap();
        assert!(current().is_ok());
        shutdown();
    }
}
