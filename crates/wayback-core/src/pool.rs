//! Bounded worker pool.
//!
//! `submit` never waits for capacity: every task gets its own tokio task that
//! queues on a semaphore, so at most `capacity` task bodies run at once.
//! Tasks are detached; `drain` is the opt-in way to wait for them.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// Decrements the active counter even if the task body panics.
struct ActiveGuard(Arc<PoolInner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                tracker: TaskTracker::new(),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Tasks submitted but still waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Running plus queued tasks.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Schedule `task`. Returns immediately; the task waits for a free slot.
    ///
    /// A panicking task is logged and releases its slot; it never takes the
    /// pool down with it.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = self.inner.clone();
        inner.queued.fetch_add(1, Ordering::SeqCst);

        self.inner.tracker.spawn(async move {
            let permit = inner.permits.clone().acquire_owned().await;
            inner.queued.fetch_sub(1, Ordering::SeqCst);
            let Ok(_permit) = permit else {
                tracing::error!("[pool] semaphore closed, dropping task");
                return;
            };

            inner.active.fetch_add(1, Ordering::SeqCst);
            let _active = ActiveGuard(inner.clone());

            if let Err(e) = tokio::spawn(task).await {
                if e.is_panic() {
                    tracing::error!("[pool] task panicked: {e}");
                } else {
                    tracing::warn!("[pool] task cancelled: {e}");
                }
            }
        });
    }

    /// Wait up to `timeout` for every submitted task to finish.
    ///
    /// Returns `true` when the pool went idle in time. The pool keeps
    /// accepting work afterwards.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let tracker = &self.inner.tracker;
        tracker.close();
        let drained = tokio::time::timeout(timeout, tracker.wait()).await.is_ok();
        tracker.reopen();
        drained
    }
}
