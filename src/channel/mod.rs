//! Bounded rendezvous/FIFO channel integrated with the suspension
//! model.
//!
//! A [`Channel`] carries values from writers to readers through three
//! coordinated structures: a FIFO buffer of at most `capacity` values,
//! a FIFO list of parked writers (each carrying the value it wants to
//! deposit), and a FIFO list of parked readers. A capacity of zero makes
//! the channel a pure rendezvous point: every transfer is a direct
//! hand-off between a writer and a reader.
//!
//! Parties park by suspending their coroutine; the matching side
//! publishes the value into the parked party's waiter cell and wakes it,
//! which routes the resumption through the parked coroutine's owning
//! executor. [`close`](Channel::close) wakes every parked party with
//! [`ChannelClosed`].
//!
//! Channel values are handles: cloning is cheap, and the channel closes
//! when the last handle is dropped.

mod awaiter;

pub use awaiter::{Read, Write};

use awaiter::{ReadWaiter, WriteWaiter};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use thiserror::Error;

/// The channel was closed while the operation was parked on it, or the
/// operation arrived after close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel is closed")]
pub struct ChannelClosed;

/// Error returned by [`Channel::try_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryWriteError<T> {
    /// The buffer is full and no reader is parked; the value is handed
    /// back.
    Full(T),
    /// The channel is closed; the value is handed back.
    Closed(T),
}

impl<T> fmt::Display for TryWriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "channel is full"),
            Self::Closed(_) => write!(f, "channel is closed"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TryWriteError<T> {}

/// Error returned by [`Channel::try_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryReadError {
    /// No buffered value and no parked writer.
    Empty,
    /// The channel is closed.
    Closed,
}

impl fmt::Display for TryReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel is empty"),
            Self::Closed => write!(f, "channel is closed"),
        }
    }
}

impl std::error::Error for TryReadError {}

/// Mutable channel state, guarded by one mutex.
struct ChannelInner<T> {
    /// Buffered values, oldest first. Never longer than `capacity`.
    buffer: VecDeque<T>,
    /// Parked writers in arrival order.
    writers: VecDeque<Arc<WriteWaiter<T>>>,
    /// Parked readers in arrival order. Non-empty only while `buffer`
    /// is empty.
    readers: VecDeque<Arc<ReadWaiter<T>>>,
}

pub(crate) struct ChannelShared<T> {
    capacity: usize,
    /// Flips true to false exactly once, before the waitlists are
    /// snapshotted under the lock.
    active: AtomicBool,
    /// Live `Channel` handles; the last one closes on drop.
    handles: AtomicUsize,
    inner: Mutex<ChannelInner<T>>,
}

/// Outcome of a writer arriving at the channel (see
/// [`ChannelShared::writer_arrive`]).
enum WriterArrival<T> {
    /// The value was delivered or buffered; wake this reader if given.
    Done(Option<Waker>),
    Closed(T),
    /// Try-mode only: buffer full, nobody parked.
    Full(T),
    Parked(Arc<WriteWaiter<T>>),
}

/// Outcome of a reader arriving at the channel (see
/// [`ChannelShared::reader_arrive`]).
enum ReaderArrival<T> {
    /// A value was obtained; wake this writer if given.
    Done(T, Option<Waker>),
    Closed,
    /// Try-mode only: nothing buffered, nobody parked.
    Empty,
    Parked(Arc<ReadWaiter<T>>),
}

impl<T: Send + 'static> ChannelShared<T> {
    /// Writer matching step, executed under the channel mutex.
    ///
    /// With a waker the writer parks when it cannot complete; without
    /// one (try mode) it reports `Full` instead. Returned wakers must be
    /// woken by the caller, after this function has released the lock.
    fn writer_arrive(&self, mut value: T, waker: Option<Waker>) -> WriterArrival<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.active.load(Ordering::Acquire) {
            return WriterArrival::Closed(value);
        }

        // Oldest parked reader takes the value directly.
        while let Some(reader) = inner.readers.pop_front() {
            match reader.deliver(value) {
                Ok(reader_waker) => {
                    drop(inner);
                    return WriterArrival::Done(reader_waker);
                }
                Err(returned) => value = returned,
            }
        }

        if inner.buffer.len() < self.capacity {
            inner.buffer.push_back(value);
            return WriterArrival::Done(None);
        }

        match waker {
            Some(waker) => {
                let waiter = Arc::new(WriteWaiter::new(value, waker));
                inner.writers.push_back(Arc::clone(&waiter));
                WriterArrival::Parked(waiter)
            }
            None => WriterArrival::Full(value),
        }
    }

    /// Reader matching step, executed under the channel mutex.
    fn reader_arrive(&self, waker: Option<Waker>) -> ReaderArrival<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.active.load(Ordering::Acquire) {
            return ReaderArrival::Closed;
        }

        if let Some(value) = inner.buffer.pop_front() {
            // Refill the freed slot from the oldest parked writer so the
            // buffer stays at capacity and writer order is preserved.
            let mut writer_waker = None;
            while let Some(writer) = inner.writers.pop_front() {
                if let Ok((deposited, waker)) = writer.take() {
                    inner.buffer.push_back(deposited);
                    writer_waker = waker;
                    break;
                }
            }
            drop(inner);
            return ReaderArrival::Done(value, writer_waker);
        }

        // Buffer empty; with capacity zero this is the rendezvous path.
        while let Some(writer) = inner.writers.pop_front() {
            if let Ok((value, writer_waker)) = writer.take() {
                drop(inner);
                return ReaderArrival::Done(value, writer_waker);
            }
        }

        match waker {
            Some(waker) => {
                let waiter = Arc::new(ReadWaiter::new(waker));
                inner.readers.push_back(Arc::clone(&waiter));
                ReaderArrival::Parked(waiter)
            }
            None => ReaderArrival::Empty,
        }
    }

    /// Removes a parked writer; called from the write future's drop.
    pub(crate) fn remove_writer(&self, target: &Arc<WriteWaiter<T>>) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(index) = inner
            .writers
            .iter()
            .position(|waiter| Arc::ptr_eq(waiter, target))
        {
            inner.writers.remove(index);
            tracing::trace!("parked writer de-registered");
        }
    }

    /// Removes a parked reader; called from the read future's drop.
    pub(crate) fn remove_reader(&self, target: &Arc<ReadWaiter<T>>) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(index) = inner
            .readers
            .iter()
            .position(|waiter| Arc::ptr_eq(waiter, target))
        {
            inner.readers.remove(index);
            tracing::trace!("parked reader de-registered");
        }
    }

    fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let (writers, readers) = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.buffer.clear();
            (
                std::mem::take(&mut inner.writers),
                std::mem::take(&mut inner.readers),
            )
        };

        tracing::debug!(
            writers = writers.len(),
            readers = readers.len(),
            "channel closed"
        );
        // Wake outside the lock; a woken coroutine may immediately
        // re-enter the channel.
        for writer in writers {
            if let Some(waker) = writer.close() {
                waker.wake();
            }
        }
        for reader in readers {
            if let Some(waker) = reader.close() {
                waker.wake();
            }
        }
    }
}

/// Creates a channel with the given capacity; `0` is a pure rendezvous
/// channel.
pub fn channel<T: Send + 'static>(capacity: usize) -> Channel<T> {
    Channel {
        shared: Arc::new(ChannelShared {
            capacity,
            active: AtomicBool::new(true),
            handles: AtomicUsize::new(1),
            inner: Mutex::new(ChannelInner {
                buffer: VecDeque::new(),
                writers: VecDeque::new(),
                readers: VecDeque::new(),
            }),
        }),
    }
}

/// A bounded rendezvous/FIFO channel handle.
///
/// See the [module docs](self) for the matching rules. All handles refer
/// to the same channel; dropping the last one closes it.
pub struct Channel<T: Send + 'static> {
    shared: Arc<ChannelShared<T>>,
}

impl<T: Send + 'static> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .field("active", &self.is_active())
            .field("buffered", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Writes `value` into the channel.
    ///
    /// The returned future completes once a reader took the value
    /// directly, the value was buffered, or the channel closed
    /// (`Err(ChannelClosed)`; the value is then dropped).
    pub fn write(&self, value: T) -> Write<'_, T> {
        Write::new(self, value)
    }

    /// Reads the next value: the oldest buffered value, a direct
    /// hand-off from the oldest parked writer, or — once the channel is
    /// closed — `Err(ChannelClosed)`.
    pub fn read(&self) -> Read<'_, T> {
        Read::new(self)
    }

    /// Non-suspending write: fails with `Full` instead of parking.
    pub fn try_write(&self, value: T) -> Result<(), TryWriteError<T>> {
        match self.shared.writer_arrive(value, None) {
            WriterArrival::Done(reader_waker) => {
                if let Some(waker) = reader_waker {
                    waker.wake();
                }
                Ok(())
            }
            WriterArrival::Closed(value) => Err(TryWriteError::Closed(value)),
            WriterArrival::Full(value) => Err(TryWriteError::Full(value)),
            WriterArrival::Parked(_) => unreachable!("try mode never parks"),
        }
    }

    /// Non-suspending read: fails with `Empty` instead of parking.
    pub fn try_read(&self) -> Result<T, TryReadError> {
        match self.shared.reader_arrive(None) {
            ReaderArrival::Done(value, writer_waker) => {
                if let Some(waker) = writer_waker {
                    waker.wake();
                }
                Ok(value)
            }
            ReaderArrival::Closed => Err(TryReadError::Closed),
            ReaderArrival::Empty => Err(TryReadError::Empty),
            ReaderArrival::Parked(_) => unreachable!("try mode never parks"),
        }
    }

    /// Closes the channel: no new parking, the buffer is discarded, and
    /// every parked party resumes with [`ChannelClosed`]. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// True until [`close`](Self::close).
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// The configured capacity (`0` for rendezvous).
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        let inner = match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.buffer.len()
    }

    /// True if no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of currently parked readers.
    pub fn waiting_readers(&self) -> usize {
        let inner = match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.readers.len()
    }

    /// Number of currently parked writers.
    pub fn waiting_writers(&self) -> usize {
        let inner = match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.writers.len()
    }
}

impl<T: Send + 'static> Clone for Channel<T> {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Drop for Channel<T> {
    fn drop(&mut self) {
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}
