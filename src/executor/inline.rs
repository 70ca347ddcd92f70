//! Executor that runs jobs synchronously on the submitting thread.

use super::{Executor, Job};

/// Runs every submitted job inline, on the thread that called
/// [`submit`](Executor::submit).
///
/// There is no queue and no handoff: `submit` returns only after the job
/// has run. A coroutine bound to this executor therefore resumes on
/// whichever thread woke it — the timer worker for sleeps, the matching
/// party's thread for channel operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, job: Job) {
        job();
    }
}
