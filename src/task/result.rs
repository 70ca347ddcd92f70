//! The success-or-failure envelope of a completed task.

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Failure token preserved from a coroutine body.
///
/// The token is cheap to clone so it can fan out to every registered
/// completion callback and to `get_result` callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The body panicked; the payload is rendered to a message.
    #[error("task body panicked: {0}")]
    Panicked(Arc<str>),
    /// The task handle was dropped before the body completed.
    #[error("task was cancelled before completion")]
    Cancelled,
}

impl TaskError {
    /// Builds the token from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message: Arc<str> = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("task body panicked")
        };
        Self::Panicked(message)
    }
}

/// Outcome of a completed task: the returned value or a failure token.
pub type TaskResult<T> = Result<T, TaskError>;
