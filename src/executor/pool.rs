//! Fixed-size background worker pool.
//!
//! [`PoolExecutor`] hands submitted jobs to a small set of long-lived
//! worker threads and returns immediately. Workers park on a condition
//! variable while the queue is empty and drain any remaining jobs before
//! exiting at shutdown.

use super::{Executor, Job};
use crossbeam_queue::SegQueue;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on how long a worker parks before re-checking the queue.
///
/// The queue is lock-free while the condvar handshake is not, so a
/// notification can slip between a worker's empty-pop and its park. The
/// timeout bounds the stall from such a missed wake.
const PARK_TIMEOUT: Duration = Duration::from_millis(50);

/// A background pool executor: submission never blocks on job execution.
///
/// The pool owns a fixed number of worker threads, chosen at
/// construction. Dropping the pool signals shutdown, wakes every worker,
/// and joins them; jobs still queued at that point are drained first.
pub struct PoolExecutor {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct PoolInner {
    /// Pending jobs. Lock-free; the mutex below only backs the condvar.
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl fmt::Debug for PoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let workers = match self.workers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        f.debug_struct("PoolExecutor")
            .field("workers", &workers)
            .field("pending", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl PoolExecutor {
    /// Creates a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        });

        let workers = (0..threads.max(1))
            .map(|index| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("corun-pool-{index}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Number of jobs waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

impl Default for PoolExecutor {
    /// Sizes the pool from the machine's available parallelism.
    fn default() -> Self {
        let threads = thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self::new(threads)
    }
}

impl Executor for PoolExecutor {
    fn submit(&self, job: Job) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::trace!("submission after pool shutdown dropped");
            return;
        }
        self.inner.queue.push(job);
        self.inner.condvar.notify_one();
    }
}

impl Drop for PoolExecutor {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.condvar.notify_all();

        let workers = {
            let mut guard = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            if worker.thread().id() == thread::current().id() {
                // Dropped from inside one of the workers; skip self-join.
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("pool worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::warn!("pool job panicked");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            tracing::trace!("pool worker exit");
            return;
        }

        let guard = match inner.mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Re-check with the lock held so a push-then-notify between our
        // empty pop and this park cannot be lost for longer than the
        // park timeout.
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            let _unused = match inner.condvar.wait_timeout(guard, PARK_TIMEOUT) {
                Ok((guard, _timeout)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
