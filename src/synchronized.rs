//! Serializing stream adapter.
//!
//! [`SynchronizedStream`] wraps an [`AsyncStream`] in a single-permit
//! [`Semaphore`] so that operations issued concurrently from multiple
//! callers execute one at a time against the inner resource, in gate
//! acquisition order, while the callers wait without blocking a thread.

use std::io::SeekFrom;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use compio_sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::StreamError;
use crate::stream::{AsyncStream, CallMode};

/// Serializes every operation against an inner stream.
///
/// The handle is cheap to clone; clones share the same gate and the same
/// inner stream, which is dropped with the last handle. Read, write, flush,
/// seek and set-length hold the gate for their full duration and release it
/// unconditionally, on success, failure and cancellation alike; inner
/// failures propagate unchanged after the gate is released. Capability
/// flags, position and timeouts are forwarded directly without taking the
/// gate: they are best-effort snapshots, not part of the serialized
/// sequence.
///
/// # Example
///
/// ```rust,no_run
/// use compio_coordination::{AsyncStream, SynchronizedExt};
///
/// # async fn example(stream: impl AsyncStream + 'static) {
/// let shared = stream.synchronized();
///
/// let writer = shared.clone();
/// compio::runtime::spawn(async move {
///     let _ = writer.write_async(b"from one task", None).await;
/// });
///
/// // Serialized against the write above, whoever reaches the gate first.
/// let mut buf = [0u8; 16];
/// let _ = shared.read_async(&mut buf, None).await;
/// # }
/// ```
pub struct SynchronizedStream<S> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    gate: Semaphore,
    stream: S,
}

impl<S> Clone for SynchronizedStream<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: AsyncStream> SynchronizedStream<S> {
    /// Wrap `stream` in a fresh single-permit gate.
    ///
    /// Prefer [`SynchronizedExt::synchronized`], which never nests adapters.
    #[must_use]
    pub fn new(stream: S) -> Self {
        let gate = Semaphore::new(1);
        trace!(gate = gate.id().get(), "stream synchronized");
        Self {
            shared: Arc::new(Shared { gate, stream }),
        }
    }

    /// Identifier of the exclusion gate, for log correlation.
    ///
    /// Handles to the same synchronized stream report the same id.
    #[must_use]
    pub fn id(&self) -> NonZeroU64 {
        self.shared.gate.id()
    }

    /// Reference to the inner stream, bypassing the gate.
    ///
    /// For inspection only: invoking operations through this reference
    /// forfeits the serialization guarantee.
    #[must_use]
    pub fn get_ref(&self) -> &S {
        &self.shared.stream
    }

    /// Already synchronized: returns a handle to the same instance.
    ///
    /// This inherent method shadows [`SynchronizedExt::synchronized`], so
    /// wrapping twice through method syntax never nests gates.
    #[must_use]
    pub fn synchronized(&self) -> SynchronizedStream<S> {
        self.clone()
    }

    /// Acquire the gate, honoring cancellation only on the async path.
    async fn enter(
        &self,
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> Result<SemaphorePermit, StreamError> {
        let acquire = match (mode, token) {
            (CallMode::Async, Some(token)) => self.shared.gate.acquire_with(token.clone()),
            _ => self.shared.gate.acquire(),
        };
        acquire.await.map_err(|_| StreamError::Cancelled)
    }

    /// Acquire the gate from a synchronous entry point.
    fn enter_blocking(&self) -> Result<SemaphorePermit, StreamError> {
        futures::executor::block_on(self.enter(None, CallMode::Blocking))
    }
}

impl<S: AsyncStream> AsyncStream for SynchronizedStream<S> {
    async fn do_read(
        &self,
        buf: &mut [u8],
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> Result<usize, StreamError> {
        let _permit = self.enter(token, mode).await?;
        self.shared.stream.do_read(buf, token, mode).await
    }

    async fn do_write(
        &self,
        buf: &[u8],
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> Result<usize, StreamError> {
        let _permit = self.enter(token, mode).await?;
        self.shared.stream.do_write(buf, token, mode).await
    }

    async fn do_flush(
        &self,
        token: Option<&CancellationToken>,
        mode: CallMode,
    ) -> Result<(), StreamError> {
        let _permit = self.enter(token, mode).await?;
        self.shared.stream.do_flush(token, mode).await
    }

    fn seek(&self, pos: SeekFrom) -> Result<u64, StreamError> {
        let _permit = self.enter_blocking()?;
        self.shared.stream.seek(pos)
    }

    fn set_len(&self, len: u64) -> Result<(), StreamError> {
        let _permit = self.enter_blocking()?;
        self.shared.stream.set_len(len)
    }

    fn len(&self) -> Result<u64, StreamError> {
        self.shared.stream.len()
    }

    fn position(&self) -> u64 {
        self.shared.stream.position()
    }

    fn set_position(&self, pos: u64) {
        self.shared.stream.set_position(pos);
    }

    fn can_read(&self) -> bool {
        self.shared.stream.can_read()
    }

    fn can_write(&self) -> bool {
        self.shared.stream.can_write()
    }

    fn can_seek(&self) -> bool {
        self.shared.stream.can_seek()
    }

    fn can_timeout(&self) -> bool {
        self.shared.stream.can_timeout()
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.shared.stream.read_timeout()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.shared.stream.set_read_timeout(timeout);
    }

    fn write_timeout(&self) -> Option<Duration> {
        self.shared.stream.write_timeout()
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.shared.stream.set_write_timeout(timeout);
    }
}

/// Extension adding [`synchronized`](SynchronizedExt::synchronized) to every
/// stream.
pub trait SynchronizedExt: AsyncStream + Sized {
    /// Wrap this stream so that concurrent callers are serialized.
    ///
    /// On a [`SynchronizedStream`] the inherent method of the same name
    /// shadows this one and returns the same instance, so wrapping is
    /// idempotent under method syntax.
    #[must_use]
    fn synchronized(self) -> SynchronizedStream<Self> {
        SynchronizedStream::new(self)
    }
}

impl<S: AsyncStream + Sized> SynchronizedExt for S {}
