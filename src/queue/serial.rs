//! Per-queue serial dispatcher.
//!
//! Each named queue keeps a FIFO of pending units and an `active` flag under a
//! single lock owned by that queue. At most one unit per queue is ever handed
//! to the worker pool; when it finishes, its completion guard pops the next
//! pending unit and submits it as a fresh pool job.
//!
//! A pool may run a job inline, inside `submit`. The completion guard then
//! fires while the dispatch that submitted it is still on the stack. Such a
//! thread keeps a frame per queue it is dispatching for; the guard parks the
//! next unit in that frame and the outer dispatch loop submits it, so the
//! stack stays flat however long the queue is.

use super::PoolSlot;
use crate::executor::{Job, WorkerPool};
use crate::future::TaskId;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

thread_local! {
    // queues this thread is currently submitting to the pool for
    static DISPATCHING: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    queue: *const Dispatcher,
    next: Option<Unit>,
}

/// A queued unit of work. `key` links it back to its future, if it has one.
pub(crate) struct Unit {
    pub(crate) key: Option<TaskId>,
    pub(crate) job: Job,
}

impl Unit {
    pub(crate) fn plain(job: Job) -> Self {
        Self { key: None, job }
    }

    pub(crate) fn keyed(key: TaskId, job: Job) -> Self {
        Self {
            key: Some(key),
            job,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Unit>,
    active: bool,
}

pub(crate) struct Dispatcher {
    name: Arc<str>,
    state: Mutex<QueueState>,
    pool: Arc<PoolSlot>,
}

impl Dispatcher {
    pub(crate) fn new(name: Arc<str>, pool: Arc<PoolSlot>) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState::default()),
            pool,
        }
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn submit(self: &Arc<Self>, unit: Unit) {
        let next = {
            let mut state = self.state.lock();
            state.pending.push_back(unit);
            if state.active {
                None
            } else {
                state.active = true;
                state.pending.pop_front()
            }
        };

        if let Some(unit) = next {
            self.dispatch(unit);
        }
    }

    /// Take the unit belonging to `key` out of the pending list, if it has not
    /// been handed to the pool yet.
    pub(crate) fn remove(&self, key: TaskId) -> Option<Unit> {
        let mut state = self.state.lock();
        let pos = state.pending.iter().position(|u| u.key == Some(key))?;
        state.pending.remove(pos)
    }

    /// Drain every pending unit. The in-flight unit, if any, is untouched.
    pub(crate) fn drain(&self) -> Vec<Unit> {
        self.state.lock().pending.drain(..).collect()
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    fn dispatch(self: &Arc<Self>, unit: Unit) {
        let key = Arc::as_ptr(self);

        // re-entered from an inline completion: hand the unit to the outer loop
        let unit = DISPATCHING.with(|frames| {
            let mut frames = frames.borrow_mut();
            match frames.iter_mut().find(|f| f.queue == key) {
                Some(frame) => {
                    frame.next = Some(unit);
                    None
                }
                None => {
                    frames.push(Frame {
                        queue: key,
                        next: None,
                    });
                    Some(unit)
                }
            }
        });

        let Some(mut unit) = unit else {
            return;
        };

        let frame = FrameGuard { queue: self };
        loop {
            self.submit_to_pool(unit);
            match frame.take_next() {
                Some(next) => unit = next,
                None => break,
            }
        }
    }

    fn submit_to_pool(self: &Arc<Self>, unit: Unit) {
        let mut guard = Advance {
            queue: self.clone(),
            started: false,
        };
        let job = unit.job;

        self.pool.current().submit(Box::new(move || {
            guard.started = true;
            job();
            drop(guard);
        }));
    }

    fn advance(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            match state.pending.pop_front() {
                Some(unit) => Some(unit),
                None => {
                    state.active = false;
                    None
                }
            }
        };

        if let Some(unit) = next {
            self.dispatch(unit);
        }
    }

    // The pool dropped our job without running it. Resubmitting would only
    // recurse through the same refusal, so give up on everything pending.
    fn abandon(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.active = false;
            state.pending.drain(..).collect::<Vec<_>>()
        };

        if !dropped.is_empty() {
            tracing::warn!(
                queue = %self.name,
                units = dropped.len(),
                "worker pool refused a job, dropping pending units"
            );
        }
    }
}

/// Pops this thread's dispatch frame for one queue.
struct FrameGuard<'a> {
    queue: &'a Arc<Dispatcher>,
}

impl FrameGuard<'_> {
    fn take_next(&self) -> Option<Unit> {
        let key = Arc::as_ptr(self.queue);
        DISPATCHING.with(|frames| {
            frames
                .borrow_mut()
                .iter_mut()
                .find(|f| f.queue == key)
                .and_then(|f| f.next.take())
        })
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let key = Arc::as_ptr(self.queue);
        let frame = DISPATCHING.with(|frames| {
            let mut frames = frames.borrow_mut();
            let pos = frames.iter().position(|f| f.queue == key)?;
            Some(frames.remove(pos))
        });

        // the pool unwound with a unit still parked here; nobody else will
        // submit it, so release the queue
        if let Some(Frame { next: Some(unit), .. }) = frame {
            drop(unit);
            self.queue.abandon();
        }
    }
}

/// Completion guard riding along with each dispatched job.
struct Advance {
    queue: Arc<Dispatcher>,
    started: bool,
}

impl Drop for Advance {
    fn drop(&mut self) {
        if self.started {
            self.queue.advance();
        } else {
            self.queue.abandon();
        }
    }
}

/// Submission handle for one named queue.
///
/// Jobs run one at a time, in submission order, on the scheduler's worker
/// pool. No future or listener machinery is involved. The handle is itself a
/// [`WorkerPool`], so anything that accepts a pool can be pointed at a queue.
#[derive(Clone)]
pub struct SerialExecutor {
    queue: Arc<Dispatcher>,
}

impl SerialExecutor {
    pub(crate) fn new(queue: Arc<Dispatcher>) -> Self {
        Self { queue }
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.submit(Unit::plain(Box::new(f)));
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Units waiting behind the one currently running.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn is_active(&self) -> bool {
        self.queue.is_active()
    }
}

impl WorkerPool for SerialExecutor {
    fn submit(&self, job: Job) {
        self.queue.submit(Unit::plain(job));
    }
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("queue", &self.queue.name())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Parks every job until the test releases it.
    #[derive(Default)]
    struct ManualPool {
        jobs: Mutex<VecDeque<Job>>,
    }

    impl ManualPool {
        fn run_next(&self) -> bool {
            let job = self.jobs.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    true
                }
                None => false,
            }
        }

        fn queued(&self) -> usize {
            self.jobs.lock().len()
        }
    }

    impl WorkerPool for ManualPool {
        fn submit(&self, job: Job) {
            self.jobs.lock().push_back(job);
        }
    }

    fn dispatcher(pool: Arc<ManualPool>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            Arc::from("q"),
            Arc::new(PoolSlot::new(pool)),
        ))
    }

    #[test]
    fn test_one_in_flight_and_fifo() {
        let pool = Arc::new(ManualPool::default());
        let queue = dispatcher(pool.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            queue.submit(Unit::plain(Box::new(move || order.lock().push(i))));
        }

        assert_eq!(pool.queued(), 1);
        assert_eq!(queue.pending(), 2);
        assert!(queue.is_active());

        while pool.run_next() {
            assert!(pool.queued() <= 1);
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(!queue.is_active());
    }

    #[test]
    fn test_remove_and_drain_leave_in_flight_alone() {
        let pool = Arc::new(ManualPool::default());
        let queue = dispatcher(pool.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        let ids: Vec<TaskId> = (0..4).map(|_| TaskId::next()).collect();
        for id in &ids {
            let ran = ran.clone();
            queue.submit(Unit::keyed(
                *id,
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            ));
        }

        assert!(queue.remove(ids[0]).is_none());
        assert!(queue.remove(ids[2]).is_some());
        assert_eq!(queue.drain().len(), 2);

        while pool.run_next() {}
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!queue.is_active());
    }

    #[test]
    fn test_refused_job_releases_queue() {
        let refusing = |job: Job| drop(job);
        let queue = Arc::new(Dispatcher::new(
            Arc::from("q"),
            Arc::new(PoolSlot::new(Arc::new(refusing))),
        ));

        queue.submit(Unit::plain(Box::new(|| {})));
        assert!(!queue.is_active());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_inline_pool_drains_long_queue_iteratively() {
        let inline = |job: Job| job();
        let queue = Arc::new(Dispatcher::new(
            Arc::from("q"),
            Arc::new(PoolSlot::new(Arc::new(inline))),
        ));
        let ran = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        // the first unit holds the queue on the draining thread
        let head = queue.clone();
        let drainer = std::thread::spawn(move || {
            head.submit(Unit::plain(Box::new(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })));
        });
        started_rx.recv().unwrap();

        for _ in 0..200_000 {
            let ran = ran.clone();
            queue.submit(Unit::plain(Box::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            })));
        }
        assert_eq!(queue.pending(), 200_000);

        release_tx.send(()).unwrap();
        drainer.join().unwrap();

        assert_eq!(ran.load(Ordering::Relaxed), 200_000);
        assert!(!queue.is_active());
    }

    #[test]
    fn test_inline_pool_keeps_fifo() {
        let inline = |job: Job| job();
        let queue = Arc::new(Dispatcher::new(
            Arc::from("q"),
            Arc::new(PoolSlot::new(Arc::new(inline))),
        ));
        let order = Arc::new(Mutex::new(Vec::new()));

        // a unit that enqueues behind itself while running inline
        let (q, o) = (queue.clone(), order.clone());
        queue.submit(Unit::plain(Box::new(move || {
            o.lock().push(0);
            for i in 1..4 {
                let o = o.clone();
                q.submit(Unit::plain(Box::new(move || o.lock().push(i))));
            }
        })));

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert!(!queue.is_active());
    }
}
