//! Bounded worker pool for remote-event delivery.
//!
//! Events received from the messaging engine are handed to this pool so the
//! transport's read path never runs application code. Tasks run in FIFO order
//! on a fixed set of worker threads.

use corelink_core::{CommsError, CommsResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{error, warn};

/// Error returned when a task cannot be queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The queue is at capacity
    #[error("dispatch queue is full ({0} tasks waiting)")]
    QueueFull(usize),
    /// The pool has been shut down
    #[error("dispatch pool has been shut down")]
    ShutDown,
}

impl From<DispatchError> for CommsError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::QueueFull(_) => CommsError::LimitExceeded(err.to_string()),
            DispatchError::ShutDown => CommsError::ConnectionUnavailable(err.to_string()),
        }
    }
}

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Number of tasks waiting in the queue.
    pub queue_depth: usize,
    /// Number of tasks currently being executed by workers.
    pub active_tasks: usize,
    /// Total number of tasks completed since pool creation.
    pub tasks_completed: u64,
    /// Number of tasks that panicked.
    pub tasks_panicked: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
    tasks_panicked: AtomicU64,
}

/// Fixed-size pool of dispatch threads.
pub struct DispatchPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl DispatchPool {
    /// Start `num_threads` workers sharing a queue of at most
    /// `max_queue_depth` waiting tasks.
    ///
    /// Workers are named `corelink-dispatch-0`, `corelink-dispatch-1`, etc.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> CommsResult<Self> {
        if num_threads == 0 || max_queue_depth == 0 {
            return Err(CommsError::IncorrectCall(format!(
                "dispatch pool needs at least one thread and one queue slot (threads={}, depth={})",
                num_threads, max_queue_depth
            )));
        }

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
        });

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };

        for i in 0..num_threads {
            let inner_clone = Arc::clone(&pool.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("corelink-dispatch-{}", i))
                .spawn(move || worker_loop(&inner_clone));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    // Stop whatever was already started
                    pool.shutdown();
                    return Err(CommsError::Resource(format!(
                        "failed to spawn dispatch thread {}: {}",
                        i, e
                    )));
                }
            }
        }

        Ok(pool)
    }

    /// Queue a task.
    ///
    /// Fails if the queue is at capacity or the pool has been shut down.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                warn!(
                    depth = queue.len(),
                    max = self.inner.max_queue_depth,
                    "Dispatch queue full, rejecting task"
                );
                return Err(DispatchError::QueueFull(queue.len()));
            }
            queue.push_back(Box::new(work));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and in-flight tasks have completed.
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Signal workers to exit once the queue is empty and join them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Notify under the queue lock so a worker between its shutdown check
        // and its wait cannot miss the wakeup
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let current = std::thread::current().id();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            // A task shutting down its own pool must not join itself
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }

    /// True once `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            tasks_panicked: self.inner.tasks_panicked.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and wakes drain waiters on drop, also when the
/// task panicked.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);

        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            inner.tasks_panicked.fetch_add(1, Ordering::Relaxed);
            let message = e
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("(non-string panic)");
            error!(panic = message, "Dispatched task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    fn pool(threads: usize, depth: usize) -> DispatchPool {
        DispatchPool::new(threads, depth).unwrap()
    }

    /// Park the single worker of `pool` until the returned barrier is released
    fn block_worker(pool: &DispatchPool) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        // Let the worker take the blocking task off the queue
        std::thread::sleep(Duration::from_millis(50));
        barrier
    }

    #[test]
    fn test_submit_and_drain() {
        let pool = pool(2, 4096);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        pool.shutdown();
    }

    #[test]
    fn test_fifo_order() {
        let pool = pool(1, 4096);
        let barrier = block_worker(&pool);

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            pool.submit(move || {
                o.lock().push(i);
            })
            .unwrap();
        }

        barrier.wait();
        pool.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        pool.shutdown();
    }

    #[test]
    fn test_backpressure() {
        let pool = pool(1, 2);
        let barrier = block_worker(&pool);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        assert_eq!(pool.submit(|| {}), Err(DispatchError::QueueFull(2)));

        barrier.wait();
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_runs_queued_tasks() {
        let pool = pool(1, 4096);
        let barrier = block_worker(&pool);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        barrier.wait();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let pool = pool(2, 4096);
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(pool.submit(|| {}), Err(DispatchError::ShutDown));
    }

    #[test]
    fn test_task_panic_does_not_hang_drain() {
        let pool = pool(2, 4096);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(|| panic!("intentional test panic")).unwrap();
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 5);

        let stats = pool.stats();
        assert_eq!(stats.tasks_completed, 6);
        assert_eq!(stats.tasks_panicked, 1);
        pool.shutdown();
    }

    #[test]
    fn test_stats() {
        let pool = pool(3, 16);
        pool.drain();
        let stats = pool.stats();
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.active_tasks, 0);
        assert_eq!(stats.worker_count, 3);
    }

    #[test]
    fn test_rejects_empty_configuration() {
        assert!(DispatchPool::new(0, 10).is_err());
        assert!(DispatchPool::new(1, 0).is_err());
    }

    #[test]
    fn test_dispatch_errors_map_to_comms_errors() {
        assert!(matches!(
            CommsError::from(DispatchError::QueueFull(3)),
            CommsError::LimitExceeded(_)
        ));
        assert!(matches!(
            CommsError::from(DispatchError::ShutDown),
            CommsError::ConnectionUnavailable(_)
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = pool(2, 4096);
        pool.submit(|| {}).unwrap();
        pool.drain();
        pool.shutdown();
        pool.shutdown();
    }
}
