//! Shared completion state between a task handle and its coroutine
//! frame.

use crate::executor::Executor;
use crate::task::result::TaskResult;
use std::sync::{Arc, Condvar, Mutex};

/// One-shot completion handler, consuming a cloned result.
pub(crate) type Callback<T> = Box<dyn FnOnce(TaskResult<T>) + Send + 'static>;

struct StateInner<T> {
    /// Set exactly once; the first seal wins.
    result: Option<TaskResult<T>>,
    /// Handlers registered before completion, in registration order.
    callbacks: Vec<Callback<T>>,
}

/// The completion state of one task: sealed result, pending callbacks,
/// blocked synchronous waiters, and the bound executor.
pub(crate) struct TaskState<T> {
    executor: Arc<dyn Executor>,
    completion: Condvar,
    inner: Mutex<StateInner<T>>,
}

impl<T: Clone + Send + 'static> TaskState<T> {
    pub(crate) fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            completion: Condvar::new(),
            inner: Mutex::new(StateInner {
                result: None,
                callbacks: Vec::new(),
            }),
        }
    }

    /// The executor resumptions of this task are routed through.
    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Seals the result, wakes synchronous waiters, and drains the
    /// callback list.
    ///
    /// Only the first seal takes effect: a cancellation racing a normal
    /// completion resolves to whichever got there first. Callbacks run
    /// outside the lock, in registration order, each with its own clone
    /// of the result.
    pub(crate) fn complete(&self, result: TaskResult<T>) {
        let callbacks = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner.result.is_some() {
                return;
            }
            inner.result = Some(result.clone());
            self.completion.notify_all();
            std::mem::take(&mut inner.callbacks)
        };

        tracing::trace!(
            ok = result.is_ok(),
            callbacks = callbacks.len(),
            "task completed"
        );
        for callback in callbacks {
            callback(result.clone());
        }
    }

    /// Blocks the calling thread until the result is sealed, then
    /// returns a clone of it.
    pub(crate) fn get_result(&self) -> TaskResult<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(result) = &inner.result {
                return result.clone();
            }
            inner = match self.completion.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Non-blocking peek at the sealed result.
    pub(crate) fn try_result(&self) -> Option<TaskResult<T>> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.result.clone()
    }

    /// Registers a completion handler.
    ///
    /// Before completion the handler is appended to the list; after
    /// completion it runs immediately on the calling thread, outside the
    /// lock, with a clone of the sealed result.
    pub(crate) fn on_completed(&self, callback: Callback<T>) {
        let ready = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(result) = inner.result.clone() {
                Some((callback, result))
            } else {
                inner.callbacks.push(callback);
                None
            }
        };
        if let Some((callback, result)) = ready {
            callback(result);
        }
    }
}
