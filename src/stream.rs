//! Byte-stream trait with one primitive operation per verb.
//!
//! Implementors provide exactly one primitive asynchronous operation per
//! verb (`do_read`, `do_write`, `do_flush`); the trait supplies every
//! calling convention on top of those as thin bridges:
//!
//! - blocking calls ([`read`](AsyncStream::read), ...) that park the calling
//!   thread,
//! - truly asynchronous calls ([`read_async`](AsyncStream::read_async), ...)
//!   that honor cancellation, and
//! - begin/end pairs ([`begin_read`](AsyncStream::begin_read) /
//!   [`end_read`](AsyncStream::end_read), ...) that start an operation and
//!   collect its result later.
//!
//! Each primitive receives a [`CallMode`] naming the convention it was
//! invoked through, so an implementation can special-case behavior (the
//! usual one: honoring cancellation only on the async path) while sharing
//! one implementation.
//!
//! Operations take `&self`, compio-style: a stream is expected to be safe to
//! invoke serially and to manage its own interior state; what it is *not*
//! expected to survive is concurrent callers, which is exactly what
//! [`SynchronizedStream`](crate::SynchronizedStream) restores.

use std::future::Future;
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

/// Calling convention a primitive stream operation was invoked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Invoked from a thread-blocking bridge (`read`, `write`, `flush`).
    Blocking,
    /// Invoked from the asynchronous path (`*_async` or a begin/end pair).
    Async,
}

/// Operation started by [`AsyncStream::begin_read`], completed by
/// [`AsyncStream::end_read`].
#[must_use = "end_read must be called to complete the operation"]
pub struct PendingRead<'a> {
    op: Pin<Box<dyn Future<Output = Result<usize, StreamError>> + 'a>>,
}

/// Operation started by [`AsyncStream::begin_write`], completed by
/// [`AsyncStream::end_write`].
#[must_use = "end_write must be called to complete the operation"]
pub struct PendingWrite<'a> {
    op: Pin<Box<dyn Future<Output = Result<usize, StreamError>> + 'a>>,
}

/// A byte-oriented resource with asynchronous primitive operations.
pub trait AsyncStream {
    /// Primitive read: fill `buf` from the current position, returning the
    /// number of bytes read.
    fn do_read(
        &self,
        buf: &mut [u8],
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> impl Future<Output = Result<usize, StreamError>>;

    /// Primitive write: write `buf` at the current position, returning the
    /// number of bytes written.
    fn do_write(
        &self,
        buf: &[u8],
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> impl Future<Output = Result<usize, StreamError>>;

    /// Primitive flush.
    fn do_flush(
        &self,
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> impl Future<Output = Result<(), StreamError>>;

    /// Move the stream position.
    fn seek(&self, pos: SeekFrom) -> Result<u64, StreamError>;

    /// Truncate or extend the stream.
    fn set_len(&self, len: u64) -> Result<(), StreamError>;

    /// Current length of the stream in bytes.
    fn len(&self) -> Result<u64, StreamError>;

    /// True if the stream is empty.
    fn is_empty(&self) -> Result<bool, StreamError> {
        Ok(self.len()? == 0)
    }

    /// Current position.
    fn position(&self) -> u64;

    /// Move to an absolute position.
    fn set_position(&self, pos: u64);

    /// True if the stream supports reading.
    fn can_read(&self) -> bool;

    /// True if the stream supports writing.
    fn can_write(&self) -> bool;

    /// True if the stream supports seeking.
    fn can_seek(&self) -> bool;

    /// True if the stream supports timeouts.
    fn can_timeout(&self) -> bool {
        false
    }

    /// Read timeout, if any.
    fn read_timeout(&self) -> Option<Duration> {
        None
    }

    /// Set the read timeout. The default implementation ignores it.
    fn set_read_timeout(&self, _timeout: Option<Duration>) {}

    /// Write timeout, if any.
    fn write_timeout(&self) -> Option<Duration> {
        None
    }

    /// Set the write timeout. The default implementation ignores it.
    fn set_write_timeout(&self, _timeout: Option<Duration>) {}

    /// Blocking read bridge for callers without access to the async model.
    ///
    /// Blocks the calling thread until the primitive completes; calling it
    /// from a scheduler thread risks deadlock. Cancellation is not honored
    /// on this path.
    fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        futures::executor::block_on(self.do_read(buf, None, CallMode::Blocking))
    }

    /// Blocking write bridge; see [`read`](Self::read) for the hazards.
    fn write(&self, buf: &[u8]) -> Result<usize, StreamError> {
        futures::executor::block_on(self.do_write(buf, None, CallMode::Blocking))
    }

    /// Blocking flush bridge; see [`read`](Self::read) for the hazards.
    fn flush(&self) -> Result<(), StreamError> {
        futures::executor::block_on(self.do_flush(None, CallMode::Blocking))
    }

    /// Asynchronous read. A token that is already cancelled fails with
    /// [`StreamError::Cancelled`] before the primitive runs.
    fn read_async<'a>(
        &'a self,
        buf: &'a mut [u8],
        token: Option<&'a CancellationToken>,
    ) -> impl Future<Output = Result<usize, StreamError>> + 'a {
        async move {
            if token.is_some_and(|t| t.is_cancelled()) {
                return Err(StreamError::Cancelled);
            }
            self.do_read(buf, token, CallMode::Async).await
        }
    }

    /// Asynchronous write; cancellation as in
    /// [`read_async`](Self::read_async).
    fn write_async<'a>(
        &'a self,
        buf: &'a [u8],
        token: Option<&'a CancellationToken>,
    ) -> impl Future<Output = Result<usize, StreamError>> + 'a {
        async move {
            if token.is_some_and(|t| t.is_cancelled()) {
                return Err(StreamError::Cancelled);
            }
            self.do_write(buf, token, CallMode::Async).await
        }
    }

    /// Asynchronous flush; cancellation as in
    /// [`read_async`](Self::read_async).
    fn flush_async<'a>(
        &'a self,
        token: Option<&'a CancellationToken>,
    ) -> impl Future<Output = Result<(), StreamError>> + 'a {
        async move {
            if token.is_some_and(|t| t.is_cancelled()) {
                return Err(StreamError::Cancelled);
            }
            self.do_flush(token, CallMode::Async).await
        }
    }

    /// Start a read without waiting for it; complete it with
    /// [`end_read`](Self::end_read). Counts as the asynchronous path.
    fn begin_read<'a>(&'a self, buf: &'a mut [u8]) -> PendingRead<'a>
    where
        Self: Sized,
    {
        PendingRead {
            op: Box::pin(self.do_read(buf, None, CallMode::Async)),
        }
    }

    /// Block until a started read completes and return its result.
    fn end_read(&self, pending: PendingRead<'_>) -> Result<usize, StreamError> {
        futures::executor::block_on(pending.op)
    }

    /// Start a write without waiting for it; complete it with
    /// [`end_write`](Self::end_write). Counts as the asynchronous path.
    fn begin_write<'a>(&'a self, buf: &'a [u8]) -> PendingWrite<'a>
    where
        Self: Sized,
    {
        PendingWrite {
            op: Box::pin(self.do_write(buf, None, CallMode::Async)),
        }
    }

    /// Block until a started write completes and return its result.
    fn end_write(&self, pending: PendingWrite<'_>) -> Result<usize, StreamError> {
        futures::executor::block_on(pending.op)
    }
}
