//! Async counting semaphore for the compio runtime.
//!
//! The semaphore maintains a number of permits that tasks consume before
//! performing an operation. When no permit is available, waiting tasks
//! suspend without blocking a thread and are served strictly FIFO when
//! permits return. Every wait cooperates with cancellation: a pending wait
//! can be abandoned through a [`CancellationToken`] (or by dropping the
//! future), and an abandoned wait never consumes a permit.
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::Semaphore;
//!
//! # async fn example() {
//! // Create a semaphore with 64 permits.
//! let semaphore = Semaphore::new(64);
//!
//! // Acquire a permit before starting work.
//! let permit = semaphore.acquire().await.unwrap();
//!
//! // Do work while holding the permit...
//!
//! // The permit is released when dropped.
//! drop(permit);
//! # }
//! ```

use std::future::Future;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cancel::CancelWatch;
use crate::error::{AcquireError, OverflowError};
use crate::id;
use crate::wait_queue::{WaitQueue, WaiterKey, WaiterState};

/// An async counting semaphore with FIFO waiters.
///
/// The handle is cheap to clone; clones share the same permit store.
///
/// # Design
///
/// - **Single exclusion section**: the permit count and the wait queue live
///   under one mutex, so a grant and a cancellation racing for the same
///   waiter are resolved deterministically; whichever takes the lock first
///   wins and the loser has no observable effect.
/// - **FIFO waiters**: permits are handed to the oldest pending waiter, so
///   sustained contention cannot starve an early requester.
/// - **Permit transfer**: a released permit granted to a waiter never passes
///   through the observable count; the count only rises when no waiter is
///   pending.
///
/// # Example
///
/// ```rust,no_run
/// use compio_sync::Semaphore;
///
/// # async fn example() {
/// let sem = Semaphore::new(100);
///
/// // Spawn many tasks; only 100 run concurrently.
/// for i in 0..1000 {
///     let sem = sem.clone();
///     compio::runtime::spawn(async move {
///         let _permit = sem.acquire().await.unwrap();
///         println!("Processing {}", i);
///     });
/// }
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

#[derive(Debug)]
struct SemaphoreInner {
    state: Mutex<SemState>,
    id: NonZeroU64,
}

#[derive(Debug)]
struct SemState {
    permits: u64,
    waiters: WaitQueue,
}

impl Semaphore {
    /// Create a new semaphore with the given number of permits.
    ///
    /// Zero is a valid initial count: the semaphore then acts as a closed
    /// gate until [`add_permits`](Self::add_permits) is called.
    #[must_use]
    pub fn new(permits: u64) -> Self {
        let id = id::next_id();
        trace!(semaphore = id.get(), permits, "semaphore created");
        Self {
            inner: Arc::new(SemaphoreInner {
                state: Mutex::new(SemState {
                    permits,
                    waiters: WaitQueue::new(),
                }),
                id,
            }),
        }
    }

    /// Process-unique identifier of this semaphore, for log correlation.
    #[must_use]
    pub fn id(&self) -> NonZeroU64 {
        self.inner.id
    }

    /// Number of currently available permits.
    ///
    /// Useful for diagnostics and tests; the value may change immediately
    /// after reading, so it must not be polled for correctness.
    #[must_use]
    pub fn available_permits(&self) -> u64 {
        self.lock_state().permits
    }

    /// Try to consume a permit without waiting.
    ///
    /// Returns `None` if no permit is available or if other tasks are
    /// already queued (the queue is never jumped).
    #[must_use]
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        let mut state = self.lock_state();
        if state.permits == 0 || state.waiters.has_pending() {
            return None;
        }
        state.permits -= 1;
        Some(SemaphorePermit {
            semaphore: self.clone(),
        })
    }

    /// Consume one permit, waiting asynchronously if none is available.
    ///
    /// The caller owns the permit afterwards and is responsible for handing
    /// it back with [`add_permits`](Self::add_permits); use
    /// [`acquire`](Self::acquire) for the scoped form that releases
    /// automatically.
    pub fn wait(&self) -> Wait {
        self.wait_internal(None)
    }

    /// Like [`wait`](Self::wait), abandoning the wait when `token` fires.
    ///
    /// If a permit is available on the first poll the wait succeeds even if
    /// the token was cancelled beforehand: availability wins over a
    /// pre-existing cancellation. A wait cancelled while queued resolves
    /// `Err(`[`AcquireError::Cancelled`]`)` and never consumes a permit. If a
    /// release grants the wait before the cancellation is applied, the grant
    /// stands and the cancellation has no further effect.
    pub fn wait_with(&self, token: CancellationToken) -> Wait {
        self.wait_internal(Some(token))
    }

    /// Acquire a permit scoped to a guard, waiting if none is available.
    ///
    /// The returned [`SemaphorePermit`] releases exactly one permit when
    /// dropped, on every exit path. A cancelled acquire produces no guard
    /// and releases nothing.
    pub fn acquire(&self) -> Acquire {
        Acquire {
            wait: self.wait_internal(None),
        }
    }

    /// Like [`acquire`](Self::acquire), abandoning the wait when `token`
    /// fires. Cancellation behaves as in [`wait_with`](Self::wait_with).
    pub fn acquire_with(&self, token: CancellationToken) -> Acquire {
        Acquire {
            wait: self.wait_internal(Some(token)),
        }
    }

    /// Release permits back to the semaphore.
    ///
    /// Each released unit first goes to the oldest pending waiter; only
    /// units no waiter absorbs become an observable increase of
    /// [`available_permits`](Self::available_permits). Releasing zero
    /// permits is a no-op and wakes nobody.
    ///
    /// # Errors
    ///
    /// Fails with [`OverflowError`] if the addition would exceed
    /// `u64::MAX`; the semaphore is left unchanged in that case.
    pub fn add_permits(&self, permits: u64) -> Result<(), OverflowError> {
        if permits == 0 {
            return Ok(());
        }
        let mut state = self.lock_state();
        if state.permits > u64::MAX - permits {
            return Err(OverflowError {
                requested: permits,
                available: state.permits,
            });
        }
        let mut remaining = permits;
        while remaining > 0 && state.waiters.grant_one() {
            remaining -= 1;
        }
        state.permits += remaining;
        trace!(
            semaphore = self.inner.id.get(),
            released = permits,
            granted = permits - remaining,
            "permits released"
        );
        Ok(())
    }

    fn wait_internal(&self, token: Option<CancellationToken>) -> Wait {
        Wait {
            semaphore: self.clone(),
            cancel: CancelWatch::new(token),
            key: None,
            finished: false,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SemState> {
        self.inner.state.lock().expect("semaphore state poisoned")
    }
}

/// Hand one permit back into `state`, preferring the oldest pending waiter.
fn release_one(state: &mut SemState) {
    if !state.waiters.grant_one() {
        // A permit returned while the counter sits at its ceiling has
        // nowhere to go; saturate rather than corrupt the count.
        state.permits = state.permits.saturating_add(1);
    }
}

/// Future returned by [`Semaphore::wait`] and [`Semaphore::wait_with`].
///
/// Resolves `Ok(())` once a permit has been consumed. Dropping the future
/// before completion abandons the wait; a permit granted in the race window
/// just before the drop is handed to the next waiter, never lost.
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    semaphore: Semaphore,
    cancel: CancelWatch,
    key: Option<WaiterKey>,
    finished: bool,
}

impl Wait {
    pub(crate) fn semaphore(&self) -> &Semaphore {
        &self.semaphore
    }
}

impl Future for Wait {
    type Output = Result<(), AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.finished, "Wait polled after completion");

        let mut state = this.semaphore.lock_state();
        match this.key {
            None => {
                // First poll. Availability wins over a pre-existing
                // cancellation, so the count is consulted before the token.
                if state.permits > 0 {
                    state.permits -= 1;
                    this.finished = true;
                    return Poll::Ready(Ok(()));
                }
                if this.cancel.is_cancelled() {
                    this.finished = true;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                let key = state.waiters.enqueue(cx.waker().clone());
                this.key = Some(key);
                // Arm the cancellation subscription only now that the waiter
                // is queued; the state lock is still held, so a token that
                // fired in between cannot have raced a grant.
                if this.cancel.poll_cancelled(cx) {
                    state.waiters.try_cancel(key);
                    this.key = None;
                    this.finished = true;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                Poll::Pending
            }
            Some(key) => match state.waiters.state(key) {
                Some(WaiterState::Granted) => {
                    // The grant happened first; a cancellation that fired
                    // since has no further effect.
                    state.waiters.take(key);
                    this.key = None;
                    this.finished = true;
                    Poll::Ready(Ok(()))
                }
                Some(WaiterState::Pending) => {
                    if this.cancel.poll_cancelled(cx) {
                        state.waiters.try_cancel(key);
                        this.key = None;
                        this.finished = true;
                        return Poll::Ready(Err(AcquireError::Cancelled));
                    }
                    state.waiters.register(key, cx.waker());
                    Poll::Pending
                }
                None => unreachable!("waiter removed while its future was alive"),
            },
        }
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(key) = self.key else {
            return;
        };
        let mut state = self.semaphore.lock_state();
        if state.waiters.take(key) == Some(WaiterState::Granted) {
            // The grant raced ahead of this drop; hand the permit on.
            release_one(&mut state);
        }
    }
}

/// Future returned by [`Semaphore::acquire`] and
/// [`Semaphore::acquire_with`]. Resolves to a [`SemaphorePermit`] guard.
#[must_use = "futures do nothing unless polled"]
pub struct Acquire {
    wait: Wait,
}

impl Future for Acquire {
    type Output = Result<SemaphorePermit, AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.wait).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(SemaphorePermit {
                semaphore: this.wait.semaphore().clone(),
            })),
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// RAII guard that releases one semaphore permit on drop.
///
/// Returned by [`Semaphore::acquire`] and [`Semaphore::try_acquire`]. The
/// release happens exactly once, on every exit path from the guarded region,
/// including panics.
#[must_use = "permit is released immediately if not held"]
#[derive(Debug)]
pub struct SemaphorePermit {
    semaphore: Semaphore,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        if let Err(error) = self.semaphore.add_permits(1) {
            // Cannot propagate from drop; the permit is forfeited and the
            // counter stays at its ceiling.
            tracing::error!(
                semaphore = self.semaphore.id().get(),
                %error,
                "failed to release held permit"
            );
        }
    }
}
