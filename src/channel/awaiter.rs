//! Read/write futures and the parked-waiter cells they register.
//!
//! A party that cannot complete its channel operation synchronously
//! parks: it pushes a waiter cell onto the channel's waitlist and
//! suspends. The matching side later publishes the outcome *into the
//! cell* — the value for a reader, a taken/closed mark for a writer —
//! and only then wakes the parked party. The woken future reads its own
//! cell and never re-enters the channel lock.
//!
//! Dropping a future that is still parked removes its cell from the
//! waitlist, so an externally cancelled coroutine leaves no dangling
//! waiter behind.

use super::{Channel, ChannelClosed, ReaderArrival, WriterArrival};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// State of one parked writer.
enum WriteCell<T> {
    /// Waiting for a reader (or a buffer slot); carries the value to
    /// deposit.
    Pending { value: T, waker: Waker },
    /// The value was taken by the channel; the write succeeded.
    Taken,
    /// The channel closed while parked; the value was discarded.
    Closed,
}

/// A parked writer entry: shared between the waitlist and the `Write`
/// future that parked.
pub(crate) struct WriteWaiter<T> {
    cell: Mutex<WriteCell<T>>,
}

impl<T> WriteWaiter<T> {
    pub(crate) fn new(value: T, waker: Waker) -> Self {
        Self {
            cell: Mutex::new(WriteCell::Pending { value, waker }),
        }
    }

    /// Takes the deposited value for delivery. Fails if the cell is no
    /// longer pending.
    pub(crate) fn take(&self) -> Result<(T, Option<Waker>), ()> {
        let mut cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *cell, WriteCell::Taken) {
            WriteCell::Pending { value, waker } => Ok((value, Some(waker))),
            other => {
                *cell = other;
                Err(())
            }
        }
    }

    /// Marks a still-pending cell closed, returning the waker to wake.
    /// A cell already taken keeps its outcome.
    pub(crate) fn close(&self) -> Option<Waker> {
        let mut cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *cell, WriteCell::Closed) {
            WriteCell::Pending { value, waker } => {
                drop(value);
                Some(waker)
            }
            other => {
                *cell = other;
                None
            }
        }
    }

    /// Post-park poll: refresh the waker while pending, or report the
    /// final outcome.
    fn status(&self, current: &Waker) -> Poll<Result<(), ChannelClosed>> {
        let mut cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &mut *cell {
            WriteCell::Pending { waker, .. } => {
                waker.clone_from(current);
                Poll::Pending
            }
            WriteCell::Taken => Poll::Ready(Ok(())),
            WriteCell::Closed => Poll::Ready(Err(ChannelClosed)),
        }
    }

    fn is_pending(&self) -> bool {
        let cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        matches!(*cell, WriteCell::Pending { .. })
    }
}

/// State of one parked reader.
enum ReadCell<T> {
    Pending { waker: Waker },
    /// A value was published for this reader.
    Delivered(T),
    Closed,
}

/// A parked reader entry: shared between the waitlist and the `Read`
/// future that parked.
pub(crate) struct ReadWaiter<T> {
    cell: Mutex<ReadCell<T>>,
}

impl<T> ReadWaiter<T> {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            cell: Mutex::new(ReadCell::Pending { waker }),
        }
    }

    /// Publishes `value` into a pending cell, returning the waker to
    /// wake. Hands the value back if the cell is no longer pending.
    pub(crate) fn deliver(&self, value: T) -> Result<Option<Waker>, T> {
        let mut cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *cell, ReadCell::Closed) {
            ReadCell::Pending { waker } => {
                *cell = ReadCell::Delivered(value);
                Ok(Some(waker))
            }
            other => {
                *cell = other;
                Err(value)
            }
        }
    }

    /// Marks a still-pending cell closed, returning the waker to wake.
    /// A cell already holding a delivered value keeps it.
    pub(crate) fn close(&self) -> Option<Waker> {
        let mut cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *cell, ReadCell::Closed) {
            ReadCell::Pending { waker } => Some(waker),
            other => {
                *cell = other;
                None
            }
        }
    }

    /// Post-park poll: refresh the waker while pending, consume the
    /// delivered value, or report closure.
    fn status(&self, current: &Waker) -> Poll<Result<T, ChannelClosed>> {
        let mut cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *cell, ReadCell::Closed) {
            ReadCell::Pending { .. } => {
                *cell = ReadCell::Pending {
                    waker: current.clone(),
                };
                Poll::Pending
            }
            ReadCell::Delivered(value) => Poll::Ready(Ok(value)),
            ReadCell::Closed => Poll::Ready(Err(ChannelClosed)),
        }
    }

    fn is_pending(&self) -> bool {
        let cell = match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        matches!(*cell, ReadCell::Pending { .. })
    }
}

/// Future returned by [`Channel::write`].
///
/// Completes with `Ok(())` once the value was handed to a reader or
/// buffered, and with `Err(ChannelClosed)` if the channel closed first.
/// Dropping the future while parked withdraws the value from the
/// channel.
pub struct Write<'a, T: Send + 'static> {
    channel: &'a Channel<T>,
    value: Option<T>,
    waiter: Option<Arc<WriteWaiter<T>>>,
}

impl<'a, T: Send + 'static> Write<'a, T> {
    pub(crate) fn new(channel: &'a Channel<T>, value: T) -> Self {
        Self {
            channel,
            value: Some(value),
            waiter: None,
        }
    }
}

// The pending value is held by plain move; nothing is self-referential.
impl<T: Send + 'static> Unpin for Write<'_, T> {}

impl<T: Send + 'static> Future for Write<'_, T> {
    type Output = Result<(), ChannelClosed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(waiter) = &this.waiter {
            let status = waiter.status(cx.waker());
            if status.is_ready() {
                this.waiter = None;
            }
            return status;
        }

        let Some(value) = this.value.take() else {
            // Polled again after completion.
            return Poll::Pending;
        };
        match this
            .channel
            .shared
            .writer_arrive(value, Some(cx.waker().clone()))
        {
            WriterArrival::Done(reader_waker) => {
                if let Some(waker) = reader_waker {
                    waker.wake();
                }
                Poll::Ready(Ok(()))
            }
            WriterArrival::Closed(value) => {
                drop(value);
                Poll::Ready(Err(ChannelClosed))
            }
            WriterArrival::Parked(waiter) => {
                this.waiter = Some(waiter);
                Poll::Pending
            }
            WriterArrival::Full(_) => unreachable!("parking mode never reports full"),
        }
    }
}

impl<T: Send + 'static> Drop for Write<'_, T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if waiter.is_pending() {
                self.channel.shared.remove_writer(&waiter);
            }
        }
    }
}

/// Future returned by [`Channel::read`].
///
/// Completes with the received value, or `Err(ChannelClosed)` once the
/// channel closes with nothing left for this reader.
pub struct Read<'a, T: Send + 'static> {
    channel: &'a Channel<T>,
    waiter: Option<Arc<ReadWaiter<T>>>,
    started: bool,
}

impl<'a, T: Send + 'static> Read<'a, T> {
    pub(crate) fn new(channel: &'a Channel<T>) -> Self {
        Self {
            channel,
            waiter: None,
            started: false,
        }
    }
}

impl<T: Send + 'static> Future for Read<'_, T> {
    type Output = Result<T, ChannelClosed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(waiter) = &this.waiter {
            let status = waiter.status(cx.waker());
            if status.is_ready() {
                this.waiter = None;
            }
            return status;
        }

        if this.started {
            // Polled again after completion.
            return Poll::Pending;
        }
        this.started = true;

        match this.channel.shared.reader_arrive(Some(cx.waker().clone())) {
            ReaderArrival::Done(value, writer_waker) => {
                if let Some(waker) = writer_waker {
                    waker.wake();
                }
                Poll::Ready(Ok(value))
            }
            ReaderArrival::Closed => Poll::Ready(Err(ChannelClosed)),
            ReaderArrival::Parked(waiter) => {
                this.waiter = Some(waiter);
                Poll::Pending
            }
            ReaderArrival::Empty => unreachable!("parking mode never reports empty"),
        }
    }
}

impl<T: Send + 'static> Drop for Read<'_, T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if waiter.is_pending() {
                self.channel.shared.remove_reader(&waiter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::test_utils::poll_once;

    #[test]
    fn close_resumes_a_parked_reader_with_failure() {
        let chan = channel::<u32>(0);
        let mut read = chan.read();
        assert!(poll_once(&mut read).is_pending());

        chan.close();
        assert_eq!(poll_once(&mut read), Poll::Ready(Err(ChannelClosed)));
    }

    #[test]
    fn close_resumes_a_parked_writer_with_failure() {
        let chan = channel::<u32>(0);
        let mut write = chan.write(5);
        assert!(poll_once(&mut write).is_pending());

        chan.close();
        assert_eq!(poll_once(&mut write), Poll::Ready(Err(ChannelClosed)));
    }

    #[test]
    fn close_wakes_every_parked_party() {
        let chan = channel::<u32>(0);
        let mut w1 = chan.write(1);
        let mut w2 = chan.write(2);
        let _ = poll_once(&mut w1);
        let _ = poll_once(&mut w2);
        assert_eq!(chan.waiting_writers(), 2);

        chan.close();
        assert_eq!(chan.waiting_writers(), 0);
        assert_eq!(poll_once(&mut w1), Poll::Ready(Err(ChannelClosed)));
        assert_eq!(poll_once(&mut w2), Poll::Ready(Err(ChannelClosed)));
    }

    #[test]
    fn dropping_a_parked_reader_deregisters_it() {
        let chan = channel::<u32>(0);
        {
            let mut read = chan.read();
            assert!(poll_once(&mut read).is_pending());
            assert_eq!(chan.waiting_readers(), 1);
        }
        assert_eq!(chan.waiting_readers(), 0);

        // A writer arriving now parks instead of matching a ghost.
        let mut write = chan.write(1);
        assert!(poll_once(&mut write).is_pending());
        assert_eq!(chan.waiting_writers(), 1);
    }

    #[test]
    fn dropping_a_parked_writer_deregisters_it_and_its_value() {
        let chan = channel::<u32>(0);
        {
            let mut write = chan.write(41);
            assert!(poll_once(&mut write).is_pending());
            assert_eq!(chan.waiting_writers(), 1);
        }
        assert_eq!(chan.waiting_writers(), 0);
        assert_eq!(chan.try_read(), Err(crate::channel::TryReadError::Empty));
    }

    #[test]
    fn dropping_a_completed_future_leaves_the_lists_alone() {
        let chan = channel::<u32>(1);
        {
            let mut write = chan.write(1);
            assert_eq!(poll_once(&mut write), Poll::Ready(Ok(())));
        }
        assert_eq!(chan.len(), 1);
        assert_eq!(chan.waiting_writers(), 0);
    }

    #[test]
    fn a_delivered_value_survives_a_racing_close() {
        let chan = channel::<u32>(0);
        let mut read = chan.read();
        assert!(poll_once(&mut read).is_pending());

        // The match succeeds first; close arrives immediately after.
        let mut write = chan.write(13);
        assert_eq!(poll_once(&mut write), Poll::Ready(Ok(())));
        chan.close();

        assert_eq!(poll_once(&mut read), Poll::Ready(Ok(13)));
    }
}
