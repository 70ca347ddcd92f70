//! Sleep future driven by the shared delayed scheduler.

use crate::time::clock::now_ms;
use crate::time::scheduler::shared_scheduler;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Suspends the current coroutine for at least `duration`.
///
/// The wake is delivered by the process-wide
/// [`DelayedScheduler`](crate::time::DelayedScheduler) and routed
/// through the coroutine's owning executor, like every other wake.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        deadline_ms: now_ms().saturating_add(duration.as_millis() as u64),
        armed: false,
        waker: Arc::new(Mutex::new(None)),
    }
}

/// Future returned by [`sleep`]. Completes once its deadline has passed.
///
/// The deadline is checked at every poll, so a `Sleep` that is polled
/// after its deadline — without ever arming a timer — completes
/// immediately. Dropping a `Sleep` before completion leaves a stale
/// one-shot timer entry behind; firing it is a no-op.
#[derive(Debug)]
pub struct Sleep {
    deadline_ms: u64,
    armed: bool,
    /// Latest waker, shared with the armed timer job.
    waker: Arc<Mutex<Option<Waker>>>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        let now = now_ms();
        if now >= this.deadline_ms {
            return Poll::Ready(());
        }

        {
            let mut waker = match this.waker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *waker = Some(cx.waker().clone());
        }

        if !this.armed {
            this.armed = true;
            let waker = Arc::clone(&this.waker);
            let remaining = i64::try_from(this.deadline_ms - now).unwrap_or(i64::MAX);
            shared_scheduler().schedule(
                Box::new(move || {
                    let taken = match waker.lock() {
                        Ok(mut guard) => guard.take(),
                        Err(poisoned) => poisoned.into_inner().take(),
                    };
                    if let Some(waker) = taken {
                        waker.wake();
                    }
                }),
                remaining,
            );
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::poll_once;
    use std::thread;

    #[test]
    fn pending_before_the_deadline_ready_after() {
        let mut sleep = sleep(Duration::from_millis(60));
        assert!(poll_once(&mut sleep).is_pending());

        thread::sleep(Duration::from_millis(100));
        assert!(poll_once(&mut sleep).is_ready());
    }

    #[test]
    fn zero_duration_is_immediately_ready() {
        let mut sleep = sleep(Duration::ZERO);
        assert!(poll_once(&mut sleep).is_ready());
    }

    #[test]
    fn timer_fires_close_to_the_deadline() {
        let start = std::time::Instant::now();
        let mut sleep = sleep(Duration::from_millis(80));
        // Arm the timer, then wait for the scheduler-driven wake by
        // polling until ready.
        while poll_once(&mut sleep).is_pending() {
            thread::sleep(Duration::from_millis(5));
        }
        let elapsed = start.elapsed();
        // now_ms truncates to whole milliseconds, so allow a sliver of
        // slack below the nominal deadline.
        assert!(elapsed >= Duration::from_millis(75), "woke early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "woke late: {elapsed:?}");
    }
}
