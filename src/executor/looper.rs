//! Single-threaded FIFO loop executors.
//!
//! [`LoopExecutor`] owns one worker thread draining one queue: submission
//! order equals execution order, and every job runs on the same thread.
//! [`SharedLoopExecutor`] is a zero-sized handle to a process-wide
//! [`LoopExecutor`] created on first use and never torn down.

use super::{Executor, Job};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

/// A FIFO executor backed by one owned worker thread.
///
/// Construction starts the worker. While the executor is active,
/// [`submit`](Executor::submit) pushes the job and wakes the worker;
/// once it is shut down, submissions are dropped. The worker pops one
/// job at a time and runs it outside the queue lock, so a running job
/// may freely submit more work to the same loop.
///
/// Dropping the executor performs `shutdown(false)` — discarding any
/// jobs still queued — and joins the worker.
pub struct LoopExecutor {
    inner: Arc<LooperInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct LooperInner {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    active: AtomicBool,
}

impl fmt::Debug for LoopExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = match self.inner.queue.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        f.debug_struct("LoopExecutor")
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

impl LoopExecutor {
    /// Starts the worker thread and returns the active executor.
    pub fn new() -> Self {
        let inner = Arc::new(LooperInner {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            active: AtomicBool::new(true),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("corun-loop".into())
            .spawn(move || run_loop(&worker_inner))
            .expect("failed to spawn loop worker");

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops accepting submissions. Idempotent.
    ///
    /// With `wait_for_complete` the worker is left to drain the jobs
    /// already queued before it exits; without it the queue is cleared
    /// and the worker exits as soon as its current job (if any)
    /// finishes.
    pub fn shutdown(&self, wait_for_complete: bool) {
        if self
            .inner
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if !wait_for_complete {
            let mut queue = match self.inner.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let dropped = queue.len();
            queue.clear();
            drop(queue);
            if dropped > 0 {
                tracing::trace!(dropped, "loop shutdown discarded queued jobs");
            }
        }

        self.inner.condvar.notify_all();
    }

    /// Joins the worker thread. Harmless if already joined.
    pub fn join(&self) {
        let worker = {
            let mut guard = match self.worker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                // Dropped from inside the worker itself; it winds down on
                // its own once the queue drains.
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("loop worker panicked");
            }
        }
    }

    /// True until [`shutdown`](Self::shutdown) is called.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }
}

impl Default for LoopExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for LoopExecutor {
    fn submit(&self, job: Job) {
        let mut queue = match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.inner.active.load(Ordering::Acquire) {
            drop(queue);
            tracing::trace!("submission after loop shutdown dropped");
            return;
        }
        queue.push_back(job);
        drop(queue);
        self.inner.condvar.notify_one();
    }
}

impl Drop for LoopExecutor {
    fn drop(&mut self) {
        self.shutdown(false);
        self.join();
    }
}

/// Worker body: drain the queue in FIFO order until shut down and empty.
fn run_loop(inner: &LooperInner) {
    loop {
        let mut queue = match inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let job = loop {
            if let Some(job) = queue.pop_front() {
                break job;
            }
            if !inner.active.load(Ordering::Acquire) {
                tracing::trace!("loop worker exit");
                return;
            }
            queue = match inner.condvar.wait(queue) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        };
        drop(queue);

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("loop job panicked");
        }
    }
}

static SHARED_LOOP: OnceLock<LoopExecutor> = OnceLock::new();

/// The process-wide shared loop, created on first use.
///
/// The returned executor lives for the rest of the process; it is never
/// shut down and its worker thread is reclaimed at process exit.
pub fn shared_loop() -> &'static LoopExecutor {
    SHARED_LOOP.get_or_init(LoopExecutor::new)
}

/// Zero-sized handle submitting to the process-wide shared loop.
///
/// All coroutines bound to a `SharedLoopExecutor` resume on the same
/// single thread, giving them loop-local FIFO ordering with respect to
/// each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedLoopExecutor;

impl Executor for SharedLoopExecutor {
    fn submit(&self, job: Job) {
        shared_loop().submit(job);
    }
}
