//! Work queue bounding concurrent provider calls.
//!
//! A counting semaphore over a FIFO: `run` admits a task immediately while
//! fewer than `max_concurrency` are active, otherwise the task waits in
//! arrival order. Tokio's semaphore is fair, so waiters are admitted first
//! come first served and nobody starves.
//!
//! ```text
//!   run(A) run(B) run(C) run(D) run(E)      max_concurrency = 3
//!     │      │      │      │      │
//!     ▼      ▼      ▼      └──────┴──► waiting (FIFO)
//!  [ active: A  B  C ]
//!     │ A completes (or fails) ──► D admitted
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

/// Default number of simultaneous provider calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// FIFO concurrency limiter for outbound lookups.
#[derive(Debug)]
pub struct WorkQueue {
    semaphore: Semaphore,
    max_concurrency: usize,
    active: AtomicUsize,
    waiting: AtomicUsize,
    peak_active: AtomicUsize,
}

impl WorkQueue {
    /// Creates a queue admitting at most `max_concurrency` tasks (at least one).
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrency),
            max_concurrency,
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Waits for admission, then runs `task` to completion.
    ///
    /// The slot is released when the task finishes, whatever its output, or
    /// when this future is dropped.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = {
            let _waiting = CountGuard::enter(&self.waiting);
            // The semaphore is private and never closed.
            let permit = self
                .semaphore
                .acquire()
                .await
                .expect("work queue semaphore closed");
            ActiveSlot::new(permit, &self.active, &self.peak_active)
        };

        let output = task.await;
        drop(slot);
        output
    }

    /// Configured concurrency bound.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Tasks waiting for admission.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Highest number of tasks observed running at once.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

/// Increments a counter for as long as it lives.
struct CountGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An admitted task's slot. Releases the permit on drop.
struct ActiveSlot<'a> {
    _permit: SemaphorePermit<'a>,
    _active: CountGuard<'a>,
}

impl<'a> ActiveSlot<'a> {
    fn new(permit: SemaphorePermit<'a>, active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let guard = CountGuard::enter(active);
        peak.fetch_max(active.load(Ordering::Relaxed), Ordering::Relaxed);
        Self {
            _permit: permit,
            _active: guard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_task_and_returns_output() {
        let queue = WorkQueue::new(2);
        let output = queue.run(async { 7 }).await;
        assert_eq!(output, 7);
        assert_eq!(queue.active(), 0);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(WorkQueue::new(0).max_concurrency(), 1);
        assert_eq!(WorkQueue::default().max_concurrency(), DEFAULT_MAX_CONCURRENCY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_concurrency() {
        let queue = Arc::new(WorkQueue::new(3));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue
                    .run(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    })
                    .await
            }));
        }

        for handle in futures::future::join_all(handles).await {
            handle.unwrap();
        }

        assert_eq!(queue.peak_active(), 3);
        assert_eq!(queue.active(), 0);
        assert_eq!(queue.waiting(), 0);
    }

    #[tokio::test]
    async fn test_admits_in_fifo_order() {
        let queue = Arc::new(WorkQueue::new(1));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Hold the only slot until every waiter is queued
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let blocker = {
            let worker = Arc::clone(&queue);
            tokio::spawn(async move {
                worker
                    .run(async {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        while queue.active() == 0 {
            tokio::task::yield_now().await;
        }

        let mut handles = Vec::new();
        for i in 0..5 {
            let worker = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                worker.run(async { order.lock().push(i) }).await
            }));
            while queue.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        release_tx.send(()).unwrap();
        blocker.await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_task_releases_slot() {
        let queue = WorkQueue::new(1);
        let failed: Result<(), &str> = queue.run(async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));

        // The slot is free again
        assert_eq!(queue.run(async { 1 }).await, 1);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let queue = Arc::new(WorkQueue::new(1));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let worker = Arc::clone(&queue);
        let blocker = tokio::spawn(async move {
            worker
                .run(async {
                    let _ = release_rx.await;
                })
                .await
        });
        while queue.active() == 0 {
            tokio::task::yield_now().await;
        }

        let worker = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { worker.run(async { 1 }).await });
        while queue.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(queue.waiting(), 0);

        release_tx.send(()).unwrap();
        blocker.await.unwrap();
        assert_eq!(queue.run(async { 2 }).await, 2);
    }
}
