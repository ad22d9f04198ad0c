use crate::error::TaskError;

/// One-shot observer of a single future's outcome.
///
/// Exactly one of the two methods is called, once, when the task completes or
/// fails. A canceled task calls neither; cancellation is reported through
/// [`TaskListener::on_cancel`](crate::listener::TaskListener::on_cancel) and
/// through [`TaskFuture::get`](super::TaskFuture::get).
pub trait FutureObserver<T>: Send + 'static {
    fn on_success(self: Box<Self>, value: &T);
    fn on_error(self: Box<Self>, error: &TaskError);
}

/// Observer built from a pair of closures. See [`observer`].
pub struct FnObserver<S, E> {
    on_success: S,
    on_error: E,
}

/// Build a [`FutureObserver`] from two closures.
pub fn observer<T, S, E>(on_success: S, on_error: E) -> FnObserver<S, E>
where
    S: FnOnce(&T) + Send + 'static,
    E: FnOnce(&TaskError) + Send + 'static,
{
    FnObserver {
        on_success,
        on_error,
    }
}

impl<T, S, E> FutureObserver<T> for FnObserver<S, E>
where
    S: FnOnce(&T) + Send + 'static,
    E: FnOnce(&TaskError) + Send + 'static,
{
    fn on_success(self: Box<Self>, value: &T) {
        (self.on_success)(value)
    }

    fn on_error(self: Box<Self>, error: &TaskError) {
        (self.on_error)(error)
    }
}

impl<S, E> std::fmt::Debug for FnObserver<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}
