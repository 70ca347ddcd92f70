//! Awaitable coroutine tasks.
//!
//! [`spawn_on`] turns a future into a running [`Task`] bound to an
//! [`Executor`]: the coroutine's first step is immediately reposted to
//! that executor (the *initial dispatch*), and every later wake — timer,
//! channel match, sub-task completion — routes the next poll step back
//! through it. The body therefore only ever runs under its executor's
//! scheduling discipline, regardless of which thread drove the wake.
//!
//! A `Task` is a cold handle: it exposes the blocking
//! [`get_result`](Task::get_result), the callback family
//! [`then`](Task::then) / [`catching`](Task::catching) /
//! [`finally`](Task::finally), and is itself a future, so one coroutine
//! can await another. Dropping the handle destroys the coroutine frame;
//! a body that has not completed yet is cancelled at its next suspension
//! point and seals a [`TaskError::Cancelled`] result.

mod result;
mod state;

pub use result::{TaskError, TaskResult};

use crate::executor::{Executor, ThreadExecutor};
use state::TaskState;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The coroutine frame cell: the boxed body plus the wake bookkeeping
/// that collapses concurrent wakes into single poll steps.
struct FrameCell<T> {
    /// The suspended body; taken while a step polls it, `None` forever
    /// once the task completed or was cancelled.
    future: Option<BoxFuture<T>>,
    /// A step is currently polling the body.
    running: bool,
    /// A step is queued on the executor and has not started yet.
    scheduled: bool,
    /// A wake arrived while the body was mid-poll; queue another step.
    rerun: bool,
    /// The handle was dropped; destroy the body instead of polling it.
    cancelled: bool,
}

/// One coroutine frame, shared between the task handle, the executor
/// jobs stepping it, and the wakers handed to its suspension points.
struct Frame<T> {
    state: Arc<TaskState<T>>,
    cell: Mutex<FrameCell<T>>,
}

impl<T: Clone + Send + 'static> Frame<T> {
    /// Arranges one more poll step on the owning executor.
    ///
    /// Wakes coalesce: while a step is queued nothing new is submitted,
    /// and a wake that lands mid-poll just flags a rerun.
    fn resume(frame: &Arc<Self>) {
        let mut cell = match frame.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cell.running {
            cell.rerun = true;
            return;
        }
        if cell.scheduled || cell.future.is_none() {
            return;
        }
        cell.scheduled = true;
        drop(cell);

        let stepper = Arc::clone(frame);
        frame
            .state
            .executor()
            .submit(Box::new(move || Frame::step(&stepper)));
    }

    /// Runs one poll step of the body on the current thread.
    fn step(frame: &Arc<Self>) {
        let mut future = {
            let mut cell = match frame.cell.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cell.scheduled = false;
            if cell.cancelled {
                let body = cell.future.take();
                drop(cell);
                if body.is_some() {
                    drop(body);
                    frame.state.complete(Err(TaskError::Cancelled));
                }
                return;
            }
            let Some(future) = cell.future.take() else {
                return;
            };
            cell.running = true;
            future
        };

        let waker = Waker::from(Arc::new(FrameWaker {
            frame: Arc::clone(frame),
        }));
        let mut cx = Context::from_waker(&waker);
        let polled = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        match polled {
            Ok(Poll::Ready(value)) => {
                let mut cell = match frame.cell.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                cell.running = false;
                drop(cell);
                drop(future);
                frame.state.complete(Ok(value));
            }
            Ok(Poll::Pending) => {
                let mut cell = match frame.cell.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                cell.running = false;
                if cell.cancelled {
                    drop(cell);
                    drop(future);
                    frame.state.complete(Err(TaskError::Cancelled));
                    return;
                }
                cell.future = Some(future);
                let rerun = std::mem::take(&mut cell.rerun);
                drop(cell);
                if rerun {
                    Frame::resume(frame);
                }
            }
            Err(payload) => {
                let mut cell = match frame.cell.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                cell.running = false;
                drop(cell);
                frame
                    .state
                    .complete(Err(TaskError::from_panic(payload.as_ref())));
            }
        }
    }

    /// Destroys the body. Called when the handle is dropped.
    ///
    /// A body mid-poll is flagged and destroyed by the polling step once
    /// it yields; a parked body is destroyed here, which also drops any
    /// suspended channel futures inside it (de-registering them from
    /// their waitlists).
    fn cancel(frame: &Arc<Self>) {
        let body = {
            let mut cell = match frame.cell.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cell.cancelled = true;
            if cell.running {
                None
            } else {
                cell.future.take()
            }
        };
        if let Some(body) = body {
            drop(body);
            frame.state.complete(Err(TaskError::Cancelled));
        }
    }
}

/// Waker routing every wake back through the frame's owning executor.
struct FrameWaker<T> {
    frame: Arc<Frame<T>>,
}

impl<T: Clone + Send + 'static> Wake for FrameWaker<T> {
    fn wake(self: Arc<Self>) {
        Frame::resume(&self.frame);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Frame::resume(&self.frame);
    }
}

/// The initial suspension: yields once so the first body step runs on
/// the owning executor rather than the spawning thread.
#[derive(Debug, Default)]
struct Dispatch {
    dispatched: bool,
}

impl Dispatch {
    fn new() -> Self {
        Self { dispatched: false }
    }
}

impl Future for Dispatch {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.dispatched {
            Poll::Ready(())
        } else {
            this.dispatched = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// An ownership handle to one running coroutine.
///
/// Move-only: the handle exclusively owns the coroutine frame, and
/// dropping it destroys the frame. The result type must be `Clone`
/// because every observer — blocked `get_result` callers, each
/// registered callback, the awaiting coroutine — receives its own copy
/// of the sealed [`TaskResult`].
pub struct Task<T: Clone + Send + 'static> {
    state: Arc<TaskState<T>>,
    frame: Arc<Frame<T>>,
    /// Latest waker of the awaiting coroutine, shared with the
    /// completion callback registered on first poll.
    await_waker: Arc<Mutex<Option<Waker>>>,
    await_registered: bool,
}

impl<T: Clone + Send + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("completed", &self.state.try_result().is_some())
            .finish_non_exhaustive()
    }
}

/// Spawns `body` as a task on a fresh-thread-per-step
/// [`ThreadExecutor`].
pub fn spawn<F>(body: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Clone + Send + 'static,
{
    spawn_on(Arc::new(ThreadExecutor), body)
}

/// Spawns `body` as a task bound to `executor`.
///
/// The caller's thread runs the coroutine only up to its initial
/// dispatch; the body itself starts on the executor.
pub fn spawn_on<F>(executor: Arc<dyn Executor>, body: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Clone + Send + 'static,
{
    let state = Arc::new(TaskState::new(executor));
    let future: BoxFuture<F::Output> = Box::pin(async move {
        Dispatch::new().await;
        body.await
    });
    let frame = Arc::new(Frame {
        state: Arc::clone(&state),
        cell: Mutex::new(FrameCell {
            future: Some(future),
            running: false,
            scheduled: false,
            rerun: false,
            cancelled: false,
        }),
    });

    // Run the frame up to the initial dispatch; the awaiter reposts the
    // first real step to the executor.
    Frame::step(&frame);

    Task {
        state,
        frame,
        await_waker: Arc::new(Mutex::new(None)),
        await_registered: false,
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Blocks the calling OS thread until the task completes, then
    /// returns a clone of the result.
    ///
    /// Do not call this from the thread the task resumes on (its loop
    /// executor's worker, for instance) — the task could never complete
    /// and the call would deadlock. Awaiting the task is the
    /// non-blocking alternative.
    pub fn get_result(&self) -> TaskResult<T> {
        self.state.get_result()
    }

    /// Non-blocking peek at the result.
    #[must_use]
    pub fn try_result(&self) -> Option<TaskResult<T>> {
        self.state.try_result()
    }

    /// Registers a completion handler receiving a clone of the result.
    ///
    /// Handlers registered before completion fire in registration order
    /// once the task completes; a handler registered afterwards runs
    /// immediately on the calling thread.
    pub fn on_completed(&self, f: impl FnOnce(TaskResult<T>) + Send + 'static) -> &Self {
        self.state.on_completed(Box::new(f));
        self
    }

    /// Registers a handler that fires only on successful completion.
    pub fn then(&self, f: impl FnOnce(T) + Send + 'static) -> &Self {
        self.on_completed(move |result| {
            if let Ok(value) = result {
                f(value);
            }
        })
    }

    /// Registers a handler that fires only on failure, receiving the
    /// failure token.
    pub fn catching(&self, f: impl FnOnce(TaskError) + Send + 'static) -> &Self {
        self.on_completed(move |result| {
            if let Err(error) = result {
                f(error);
            }
        })
    }

    /// Registers a handler that fires on completion regardless of
    /// outcome.
    pub fn finally(&self, f: impl FnOnce() + Send + 'static) -> &Self {
        self.on_completed(move |_| f())
    }
}

impl<T: Clone + Send + 'static> Future for Task<T> {
    type Output = TaskResult<T>;

    /// Awaiting a task parks the awaiting coroutine on the task's
    /// completion (via a `finally`-style callback) and yields a clone of
    /// the result once sealed.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(result) = this.state.try_result() {
            return Poll::Ready(result);
        }

        {
            let mut waker = match this.await_waker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *waker = Some(cx.waker().clone());
        }

        if !this.await_registered {
            this.await_registered = true;
            let cell = Arc::clone(&this.await_waker);
            // Runs inline right here if the task completed in between,
            // so the wake cannot be lost.
            this.state.on_completed(Box::new(move |_| {
                let taken = match cell.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                if let Some(waker) = taken {
                    waker.wake();
                }
            }));
        }

        Poll::Pending
    }
}

impl<T: Clone + Send + 'static> Drop for Task<T> {
    fn drop(&mut self) {
        Frame::cancel(&self.frame);
    }
}
