//! Interrupt flag visible to the running task body.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Returns true if the task running on this thread was canceled with
/// `may_interrupt` set.
///
/// Task bodies that loop or park should poll this and return early. Outside of
/// a task body it always returns false.
pub fn interrupted() -> bool {
    CURRENT.with(|cur| {
        cur.borrow()
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    })
}

/// Run `f` with `flag` installed as the current interrupt flag.
pub(crate) fn scope<R>(flag: &Arc<AtomicBool>, f: impl FnOnce() -> R) -> R {
    let prev = CURRENT.with(|cur| cur.borrow_mut().replace(flag.clone()));
    let _restore = Restore(prev);
    f()
}

// Puts back the outer flag even if `f` unwinds.
struct Restore(Option<Arc<AtomicBool>>);

impl Drop for Restore {
    fn drop(&mut self) {
        let prev = self.0.take();
        CURRENT.with(|cur| *cur.borrow_mut() = prev);
    }
}
