//! Monotonic millisecond clock shared by the timer machinery.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the process first asked for the time.
///
/// The epoch is pinned on first use, so all readers in the process see
/// one consistent, monotonically non-decreasing timeline. Wall-clock
/// adjustments do not affect it.
pub fn now_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
