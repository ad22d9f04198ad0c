//! Per-submission task handles.
//!
//! A [`TaskFuture`] tracks one task through
//! `Scheduled -> Running -> {Completed, Failed, Canceled}`. Every terminal
//! transition is a compare-and-set on the state word, so natural completion
//! and cancellation cannot both win: the loser's notifications are suppressed.
//!
//! Lifecycle listener events for one task are emitted under a per-task
//! reentrant lock. That keeps them totally ordered
//! (`scheduled -> started -> finished | errored`, or `scheduled -> canceled`)
//! even when `cancel` races with the worker.

pub mod interrupt;
pub mod observer;
pub mod state;

pub use interrupt::interrupted;
pub use observer::{observer, FnObserver, FutureObserver};
pub use state::{TaskId, TaskInfo, TaskState};

use crate::error::{BoxError, TaskError};
use crate::executor::{panic_message, Job};
use crate::listener::ListenerRegistry;
use crate::queue::serial::Dispatcher;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

pub(crate) type Body<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send + 'static>;

type Outcome<T> = Result<T, TaskError>;

struct Slot<T> {
    outcome: Option<Outcome<T>>,
    observers: Vec<Box<dyn FutureObserver<T>>>,
}

struct Shared<T> {
    info: TaskInfo,
    state: AtomicU8,
    slot: Mutex<Slot<T>>,
    done: Condvar,
    transition: ReentrantMutex<()>,
    interrupt: Arc<AtomicBool>,
    runner: Mutex<Option<Thread>>,
    listeners: Arc<ListenerRegistry>,
    queue: Option<Weak<Dispatcher>>,
}

/// Handle to a scheduled task.
///
/// Cloning the handle is cheap; all clones observe the same task.
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("id", &self.shared.info.id())
            .field("queue", &self.shared.info.queue())
            .field("state", &self.state())
            .finish()
    }
}

impl<T> TaskFuture<T> {
    pub fn id(&self) -> TaskId {
        self.shared.info.id()
    }

    pub fn queue(&self) -> Option<&str> {
        self.shared.info.queue()
    }

    pub fn info(&self) -> &TaskInfo {
        &self.shared.info
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }
}

impl<T> TaskFuture<T>
where
    T: Clone + Send + 'static,
{
    /// Create a future in `Created` state plus the job that drives it.
    ///
    /// Dropping the job without running it cancels the future.
    pub(crate) fn new(
        info: TaskInfo,
        listeners: Arc<ListenerRegistry>,
        queue: Option<Weak<Dispatcher>>,
        body: Body<T>,
    ) -> (Self, Job) {
        let shared = Arc::new(Shared {
            info,
            state: AtomicU8::new(TaskState::Created as u8),
            slot: Mutex::new(Slot {
                outcome: None,
                observers: Vec::new(),
            }),
            done: Condvar::new(),
            transition: ReentrantMutex::new(()),
            interrupt: Arc::new(AtomicBool::new(false)),
            runner: Mutex::new(None),
            listeners,
            queue,
        });

        let runner = Runner {
            shared: Some(shared.clone()),
            body: Some(body),
        };

        (Self { shared }, Box::new(move || runner.run()))
    }

    /// `Created -> Scheduled`, emitting the `scheduled` event.
    pub(crate) fn mark_scheduled(&self) {
        let shared = &self.shared;
        let _order = shared.transition.lock();
        if shared
            .state
            .compare_exchange(
                TaskState::Created as u8,
                TaskState::Scheduled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            shared.listeners.scheduled(&shared.info);
        }
    }

    /// Cancel the task.
    ///
    /// A task that has not started yet is removed from its queue and its body
    /// never runs. A running task is marked canceled and its eventual result is
    /// discarded; with `may_interrupt` the body also sees
    /// [`interrupted()`](crate::interrupted) return true and its worker thread is
    /// unparked. Returns false if the task had already reached a terminal state.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.shared.cancel(may_interrupt)
    }

    /// Block until the task finishes and return its value or error.
    pub fn get(&self) -> Result<T, TaskError> {
        self.shared.wait(None)
    }

    /// Like [`get`](Self::get) but gives up after `timeout` with
    /// [`TaskError::Timeout`]. The task itself keeps going.
    ///
    /// A timeout too large to represent as a deadline waits without one.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        self.shared.wait(Instant::now().checked_add(timeout))
    }

    /// Register an observer for the task's success or failure.
    ///
    /// If the task already completed or failed, the observer runs on the calling
    /// thread before this returns. Otherwise it runs on the worker thread that
    /// finishes the task. Observers of a canceled task are dropped uncalled.
    pub fn subscribe<O>(&self, observer: O)
    where
        O: FutureObserver<T>,
    {
        self.subscribe_boxed(Box::new(observer))
    }

    pub fn subscribe_boxed(&self, observer: Box<dyn FutureObserver<T>>) {
        let outcome = {
            let mut slot = self.shared.slot.lock();
            match &slot.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    slot.observers.push(observer);
                    return;
                }
            }
        };

        notify_observer(&self.shared.info, observer, &outcome);
    }
}

impl<T> Shared<T>
where
    T: Clone + Send + 'static,
{
    fn run(&self, body: Body<T>) {
        {
            let _order = self.transition.lock();
            if self
                .state
                .compare_exchange(
                    TaskState::Scheduled as u8,
                    TaskState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                tracing::trace!(task = %self.info.id(), "skipping canceled task");
                return;
            }
            *self.runner.lock() = Some(thread::current());
            self.listeners.started(&self.info);
        }

        let result = interrupt::scope(&self.interrupt, || catch_unwind(AssertUnwindSafe(body)));
        self.runner.lock().take();

        let outcome = match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::failed(err)),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        };

        self.finish(outcome);
    }

    fn finish(&self, outcome: Outcome<T>) {
        let target = match outcome {
            Ok(_) => TaskState::Completed,
            Err(_) => TaskState::Failed,
        };

        let observers = {
            let _order = self.transition.lock();
            if self
                .state
                .compare_exchange(
                    TaskState::Running as u8,
                    target as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                tracing::debug!(task = %self.info.id(), "result discarded, task was canceled");
                return;
            }

            match &outcome {
                Ok(value) => self.listeners.finished(&self.info, value),
                Err(err) => self.listeners.errored(&self.info, err),
            }
            self.publish(outcome.clone())
        };

        for observer in observers {
            notify_observer(&self.info, observer, &outcome);
        }
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        let (prev, dropped) = {
            let _order = self.transition.lock();
            let mut current = self.state.load(Ordering::Acquire);
            loop {
                if TaskState::from_u8(current).is_terminal() {
                    return false;
                }
                match self.state.compare_exchange(
                    current,
                    TaskState::Canceled as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }

            self.listeners.canceled(&self.info);
            (
                TaskState::from_u8(current),
                self.publish(Err(TaskError::Canceled)),
            )
        };
        drop(dropped);

        match prev {
            TaskState::Running if may_interrupt => {
                self.interrupt.store(true, Ordering::Release);
                if let Some(worker) = self.runner.lock().as_ref() {
                    worker.unpark();
                }
            }
            TaskState::Created | TaskState::Scheduled => {
                let unit = self
                    .queue
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .and_then(|queue| queue.remove(self.info.id()));
                drop(unit);
            }
            _ => {}
        }

        true
    }

    // Store the outcome and wake waiters. Only the winner of the terminal
    // transition gets here, after its listener event, so `get` returning
    // implies the listeners have seen the task's last event.
    fn publish(&self, outcome: Outcome<T>) -> Vec<Box<dyn FutureObserver<T>>> {
        let observers = {
            let mut slot = self.slot.lock();
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.observers)
        };
        self.done.notify_all();
        observers
    }

    fn wait(&self, deadline: Option<Instant>) -> Outcome<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut slot, deadline).timed_out() {
                        return match &slot.outcome {
                            Some(outcome) => outcome.clone(),
                            None => Err(TaskError::Timeout),
                        };
                    }
                }
                None => self.done.wait(&mut slot),
            }
        }
    }
}

fn notify_observer<T: 'static>(info: &TaskInfo, observer: Box<dyn FutureObserver<T>>, outcome: &Outcome<T>) {
    let result = catch_unwind(AssertUnwindSafe(|| match outcome {
        Ok(value) => observer.on_success(value),
        Err(TaskError::Canceled) => {}
        Err(err) => observer.on_error(err),
    }));

    if let Err(payload) = result {
        tracing::warn!(
            task = %info.id(),
            message = %panic_message(payload.as_ref()),
            "future observer panicked"
        );
    }
}

/// The job handed to a queue or pool. Cancels its future if dropped unrun.
struct Runner<T>
where
    T: Clone + Send + 'static,
{
    shared: Option<Arc<Shared<T>>>,
    body: Option<Body<T>>,
}

impl<T> Runner<T>
where
    T: Clone + Send + 'static,
{
    fn run(mut self) {
        if let (Some(shared), Some(body)) = (self.shared.take(), self.body.take()) {
            shared.run(body);
        }
    }
}

impl<T> Drop for Runner<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.cancel(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::TaskListener;
    use std::any::Any;

    fn future<T, F>(body: F) -> (TaskFuture<T>, Job)
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        let (future, job) = TaskFuture::new(
            TaskInfo::new(None),
            Arc::new(ListenerRegistry::new()),
            None,
            Box::new(body),
        );
        future.mark_scheduled();
        (future, job)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl TaskListener for Recorder {
        fn on_schedule(&self, _: &TaskInfo) {
            self.0.lock().push("scheduled");
        }
        fn on_start(&self, _: &TaskInfo) {
            self.0.lock().push("started");
        }
        fn on_finish(&self, _: &TaskInfo, _: &dyn Any) {
            self.0.lock().push("finished");
        }
        fn on_cancel(&self, _: &TaskInfo) {
            self.0.lock().push("canceled");
        }
        fn on_error(&self, _: &TaskInfo, _: &TaskError) {
            self.0.lock().push("errored");
        }
    }

    #[test]
    fn test_run_to_completion() {
        let (future, job) = future(|| Ok(7));
        assert_eq!(future.state(), TaskState::Scheduled);

        job();

        assert_eq!(future.state(), TaskState::Completed);
        assert_eq!(future.get().unwrap(), 7);
        assert!(!future.cancel(true));
    }

    #[test]
    fn test_failure_and_panic() {
        let (failing, job) = future::<i32, _>(|| Err("bad input".into()));
        job();
        assert_eq!(failing.state(), TaskState::Failed);
        assert_eq!(failing.get().unwrap_err().failure().unwrap().to_string(), "bad input");

        let (panicking, job) = future::<i32, _>(|| panic!("kaboom"));
        job();
        match panicking.get() {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_before_start_skips_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let (future, job) = future(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(future.cancel(false));
        assert!(!future.cancel(false));
        job();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(future.get().unwrap_err().is_canceled());
    }

    #[test]
    fn test_dropping_job_cancels() {
        let (future, job) = future(|| Ok(1));
        drop(job);
        assert_eq!(future.state(), TaskState::Canceled);
    }

    #[test]
    fn test_timeout_does_not_cancel() {
        let (future, job) = future(|| Ok("late"));
        assert!(future.get_timeout(Duration::from_millis(10)).unwrap_err().is_timeout());
        assert_eq!(future.state(), TaskState::Scheduled);
        job();
        assert_eq!(future.get().unwrap(), "late");
    }

    #[test]
    fn test_unbounded_timeout_waits() {
        let (done, job) = future(|| Ok(3));
        job();
        assert_eq!(done.get_timeout(Duration::MAX).unwrap(), 3);

        let (pending, job) = future(|| Ok("later"));
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            job();
        });
        assert_eq!(pending.get_timeout(Duration::MAX).unwrap(), "later");
        worker.join().unwrap();
    }

    #[test]
    fn test_subscribe_after_completion_is_synchronous() {
        let (future, job) = future(|| Ok(5u32));
        job();

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        future.subscribe(observer(
            move |v: &u32| *sink.lock() = Some(*v),
            |_| panic!("no error expected"),
        ));

        assert_eq!(*seen.lock(), Some(5));
    }

    #[test]
    fn test_observer_not_called_on_cancel() {
        let (future, job) = future(|| Ok(()));
        let called = Arc::new(AtomicBool::new(false));
        let (a, b) = (called.clone(), called.clone());
        future.subscribe(observer(
            move |_: &()| a.store(true, Ordering::SeqCst),
            move |_| b.store(true, Ordering::SeqCst),
        ));

        future.cancel(true);
        drop(job);

        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_while_running_discards_result() {
        let registry = Arc::new(ListenerRegistry::new());
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());

        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (future, job) = TaskFuture::new(
            TaskInfo::new(None),
            registry,
            None,
            Box::new(move || {
                started_tx.send(()).unwrap();
                while !interrupted() {
                    thread::park_timeout(Duration::from_millis(5));
                }
                Ok(99)
            }),
        );
        future.mark_scheduled();

        let worker = thread::spawn(job);
        started_rx.recv().unwrap();

        assert!(future.cancel(true));
        worker.join().unwrap();

        assert!(future.get().unwrap_err().is_canceled());
        assert_eq!(*recorder.0.lock(), vec!["scheduled", "started", "canceled"]);
    }
}
