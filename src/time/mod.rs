//! Time-based suspension: the millisecond clock, the delayed scheduler,
//! and the [`sleep`] future.
//!
//! All sleeps in the process share one [`DelayedScheduler`] worker
//! thread (see [`shared_scheduler`]). The scheduler itself is usable
//! standalone for arbitrary delayed jobs.

mod clock;
mod scheduler;
mod sleep;

pub use clock::now_ms;
pub use scheduler::{shared_scheduler, DelayedScheduler};
pub use sleep::{sleep, Sleep};
