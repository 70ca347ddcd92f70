//! Executor that gives every job a fresh, joined worker thread.

use super::{Executor, Job};
use std::thread;

/// Spawns one short-lived OS thread per submitted job and joins it
/// before returning.
///
/// The submitter blocks until the job has run to completion on the fresh
/// thread. For coroutine resumptions this means the waking thread waits
/// out one segment of the coroutine body (up to its next suspension
/// point) — simple, predictable, and expensive. This is the default
/// executor of [`spawn`](crate::task::spawn).
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn submit(&self, job: Job) {
        let handle = thread::Builder::new()
            .name("corun-oneshot".into())
            .spawn(job);
        match handle {
            Ok(worker) => {
                if worker.join().is_err() {
                    tracing::warn!("one-shot worker panicked");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "thread spawn failed, job dropped");
            }
        }
    }
}
