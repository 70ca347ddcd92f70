//! Corun: Go-flavoured coroutine tasks for Rust.
//!
//! # Overview
//!
//! Corun is a small task runtime shaped after Go's concurrency model:
//! coroutines (plain Rust futures) become awaitable [`Task`]s with
//! completion callbacks, every task is bound to an [`Executor`] that
//! decides where its resumptions run, time-based suspension goes through
//! a shared millisecond [`DelayedScheduler`], and tasks meet over bounded
//! rendezvous/FIFO [`Channel`]s whose parked parties are woken back onto
//! their owning executor.
//!
//! # Core Guarantees
//!
//! - **Executor affinity**: a task's body only ever runs on its bound
//!   executor, no matter which thread drove the wake (timer, channel
//!   match, task completion)
//! - **Sealed results**: a task completes exactly once; callbacks drain
//!   exactly once, in registration order, outside all locks
//! - **FIFO channels**: parked readers and writers are matched strictly
//!   in arrival order; close wakes every parked party
//! - **Clean cancellation**: dropping a parked channel future removes it
//!   from the waitlist; dropping a task handle seals a cancelled result
//!
//! # Module Structure
//!
//! - [`task`]: the awaitable task handle, spawn entry points, completion
//!   state and failure token
//! - [`executor`]: the [`Executor`] capability and its five concrete
//!   implementations
//! - [`time`]: the delayed scheduler, the monotonic millisecond clock,
//!   and [`sleep`]
//! - [`channel`]: the bounded rendezvous/FIFO channel
//! - [`test_utils`]: logging and polling helpers shared by the test
//!   suites
//!
//! # Example
//!
//! ```ignore
//! use corun::{channel, spawn_on, SharedLoopExecutor};
//! use std::sync::Arc;
//!
//! let chan = channel::<u32>(2);
//! let tx = chan.clone();
//! let producer = spawn_on(Arc::new(SharedLoopExecutor), async move {
//!     for i in 0..10 {
//!         tx.write(i).await.expect("channel closed early");
//!     }
//!     tx.close();
//! });
//! let consumer = spawn_on(Arc::new(SharedLoopExecutor), async move {
//!     let mut sum = 0;
//!     while let Ok(v) = chan.read().await {
//!         sum += v;
//!     }
//!     sum
//! });
//! producer.get_result().unwrap();
//! assert_eq!(consumer.get_result().unwrap(), 45);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod executor;
pub mod task;
pub mod test_utils;
pub mod time;

pub use channel::{channel, Channel, ChannelClosed};
pub use executor::{
    Executor, InlineExecutor, Job, LoopExecutor, PoolExecutor, SharedLoopExecutor, ThreadExecutor,
};
pub use task::{spawn, spawn_on, Task, TaskError, TaskResult};
pub use time::{sleep, DelayedScheduler, Sleep};
