//! Delayed job scheduler: one worker thread over a min-heap of
//! deadline-tagged jobs.

use crate::executor::Job;
use crate::time::clock::now_ms;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A job bound to an absolute millisecond deadline.
///
/// Heap order is earliest-deadline-first; the sequence number makes the
/// order total, though callers must not rely on any particular order
/// among equal deadlines.
struct DelayedItem {
    deadline_ms: u64,
    seq: u64,
    job: Job,
}

impl fmt::Debug for DelayedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedItem")
            .field("deadline_ms", &self.deadline_ms)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl PartialEq for DelayedItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for DelayedItem {}

impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest
        // deadline on top.
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Running,
    ShuttingDown,
}

struct TimerQueue {
    heap: BinaryHeap<DelayedItem>,
    state: SchedulerState,
    next_seq: u64,
}

struct SchedulerInner {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}

/// A timer loop executing jobs after a millisecond delay.
///
/// Construction starts the single worker thread. [`schedule`]
/// (Self::schedule) inserts a job keyed by `now + delay`; the worker
/// sleeps until the earliest deadline and runs due jobs one at a time,
/// outside the queue lock.
///
/// Dropping the scheduler is `shutdown(true)` plus a join: jobs already
/// scheduled still fire as their deadlines pass, and the worker exits
/// once the queue is empty. Use [`shutdown`](Self::shutdown) with
/// `wait_for_complete = false` first to discard pending jobs instead.
pub struct DelayedScheduler {
    inner: Arc<SchedulerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DelayedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pending, state) = {
            let queue = match self.inner.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            (queue.heap.len(), queue.state)
        };
        f.debug_struct("DelayedScheduler")
            .field("pending", &pending)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl DelayedScheduler {
    /// Starts the worker thread and returns the running scheduler.
    pub fn new() -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                state: SchedulerState::Running,
                next_seq: 0,
            }),
            condvar: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("corun-timer".into())
            .spawn(move || run_timer(&worker_inner))
            .expect("failed to spawn timer worker");

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Schedules `job` to run `delay_ms` milliseconds from now.
    ///
    /// Negative delays clamp to zero. After shutdown the job is dropped
    /// silently.
    pub fn schedule(&self, job: Job, delay_ms: i64) {
        let delay = u64::try_from(delay_ms).unwrap_or(0);
        let deadline_ms = now_ms().saturating_add(delay);

        let mut queue = match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.state == SchedulerState::ShuttingDown {
            drop(queue);
            tracing::trace!("schedule after shutdown dropped");
            return;
        }

        // Only a new earliest deadline moves the worker's wakeup time.
        let need_notify = queue
            .heap
            .peek()
            .map_or(true, |head| deadline_ms < head.deadline_ms);

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(DelayedItem {
            deadline_ms,
            seq,
            job,
        });
        drop(queue);

        if need_notify {
            self.inner.condvar.notify_all();
        }
    }

    /// Stops accepting jobs. Idempotent.
    ///
    /// With `wait_for_complete` the already-scheduled jobs remain and
    /// fire as their deadlines pass; without it the queue is cleared and
    /// the worker exits immediately.
    pub fn shutdown(&self, wait_for_complete: bool) {
        let mut queue = match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.state == SchedulerState::ShuttingDown {
            return;
        }
        queue.state = SchedulerState::ShuttingDown;

        if !wait_for_complete {
            let dropped = queue.heap.len();
            queue.heap.clear();
            if dropped > 0 {
                tracing::trace!(dropped, "scheduler shutdown discarded pending jobs");
            }
        }
        drop(queue);

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
                // its own.
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("timer worker panicked");
            }
        }
    }

    /// Number of jobs waiting for their deadline.
    pub fn pending(&self) -> usize {
        let queue = match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.heap.len()
    }
}

impl Default for DelayedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DelayedScheduler {
    fn drop(&mut self) {
        self.shutdown(true);
        self.join();
    }
}

/// Worker body: sleep until the earliest deadline, pop and run due jobs.
fn run_timer(inner: &SchedulerInner) {
    loop {
        let mut queue = match inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let job = loop {
            let Some(head_deadline) = queue.heap.peek().map(|item| item.deadline_ms) else {
                if queue.state == SchedulerState::ShuttingDown {
                    tracing::trace!("timer worker exit");
                    return;
                }
                queue = match inner.condvar.wait(queue) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                continue;
            };

            let now = now_ms();
            if head_deadline > now {
                // Sleep out the remaining delay; any wakeup re-evaluates
                // the head, which may have changed underneath us.
                let wait = Duration::from_millis(head_deadline - now);
                queue = match inner.condvar.wait_timeout(queue, wait) {
                    Ok((guard, _timeout)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
                continue;
            }

            let Some(item) = queue.heap.pop() else {
                continue;
            };
            break item.job;
        };
        drop(queue);

        job();
    }
}

static SHARED_SCHEDULER: OnceLock<DelayedScheduler> = OnceLock::new();

/// The process-wide scheduler driving [`sleep`](crate::time::sleep),
/// created on first use and never shut down.
pub fn shared_scheduler() -> &'static DelayedScheduler {
    SHARED_SCHEDULER.get_or_init(DelayedScheduler::new)
}
