//! Async manual-reset event: a broadcast signal over the wait queue.
//!
//! Unlike the semaphore, an event waiter consumes nothing: setting the event
//! releases every pending waiter at the same step, and the event stays set
//! for later arrivals until it is reset.

use std::future::Future;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cancel::CancelWatch;
use crate::error::AcquireError;
use crate::id;
use crate::wait_queue::{WaitQueue, WaiterKey, WaiterState};

/// An async event that, once set, releases all current and future waiters.
///
/// The handle is cheap to clone; clones share the same signal.
///
/// # Example
///
/// ```rust,no_run
/// use compio_sync::ManualResetEvent;
///
/// # async fn example() {
/// let ready = ManualResetEvent::new(false);
///
/// let waiter = ready.clone();
/// compio::runtime::spawn(async move {
///     waiter.wait().await.unwrap();
///     // runs once `ready.set()` is called
/// });
///
/// ready.set();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ManualResetEvent {
    inner: Arc<EventInner>,
}

#[derive(Debug)]
struct EventInner {
    state: Mutex<EventState>,
    id: NonZeroU64,
}

#[derive(Debug)]
struct EventState {
    set: bool,
    waiters: WaitQueue,
}

impl ManualResetEvent {
    /// Create a new event in the given state.
    #[must_use]
    pub fn new(set: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    set,
                    waiters: WaitQueue::new(),
                }),
                id: id::next_id(),
            }),
        }
    }

    /// Process-unique identifier of this event, for log correlation.
    #[must_use]
    pub fn id(&self) -> NonZeroU64 {
        self.inner.id
    }

    /// True if the event is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.lock_state().set
    }

    /// Set the event, releasing every pending waiter simultaneously.
    ///
    /// Idempotent: setting an already-set event has no effect.
    pub fn set(&self) {
        let mut state = self.lock_state();
        if state.set {
            return;
        }
        state.set = true;
        let woken = state.waiters.grant_all();
        trace!(event = self.inner.id.get(), woken, "event set");
    }

    /// Reset the event so that future waits queue again.
    ///
    /// Waiters released by an earlier [`set`](Self::set) stay released.
    pub fn reset(&self) {
        self.lock_state().set = false;
    }

    /// Wait until the event is set.
    ///
    /// Completes immediately, without queuing, if the event is already set.
    pub fn wait(&self) -> EventWait {
        self.wait_internal(None)
    }

    /// Like [`wait`](Self::wait), abandoning the wait when `token` fires.
    ///
    /// An already-set event wins over a pre-cancelled token; a waiter
    /// released by `set` before the cancellation is applied stays released.
    pub fn wait_with(&self, token: CancellationToken) -> EventWait {
        self.wait_internal(Some(token))
    }

    fn wait_internal(&self, token: Option<CancellationToken>) -> EventWait {
        EventWait {
            event: self.clone(),
            cancel: CancelWatch::new(token),
            key: None,
            finished: false,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EventState> {
        self.inner.state.lock().expect("event state poisoned")
    }
}

/// Future returned by [`ManualResetEvent::wait`] and
/// [`ManualResetEvent::wait_with`].
#[must_use = "futures do nothing unless polled"]
pub struct EventWait {
    event: ManualResetEvent,
    cancel: CancelWatch,
    key: Option<WaiterKey>,
    finished: bool,
}

impl Future for EventWait {
    type Output = Result<(), AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.finished, "EventWait polled after completion");

        let mut state = this.event.lock_state();
        match this.key {
            None => {
                if state.set {
                    this.finished = true;
                    return Poll::Ready(Ok(()));
                }
                if this.cancel.is_cancelled() {
                    this.finished = true;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                let key = state.waiters.enqueue(cx.waker().clone());
                this.key = Some(key);
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

impl Drop for EventWait {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(key) = self.key else {
            return;
        };
        // Nothing to give back: event grants carry no permit.
        self.event.lock_state().waiters.take(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};

    fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(future).poll(&mut cx)
    }

    struct CountingWake(AtomicUsize);

    impl Wake for CountingWake {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Waker, Arc<CountingWake>) {
        let wake = Arc::new(CountingWake(AtomicUsize::new(0)));
        (Waker::from(wake.clone()), wake)
    }

    #[test]
    fn wait_on_a_set_event_completes_immediately() {
        let event = ManualResetEvent::new(true);
        let mut wait = event.wait();
        assert_eq!(poll_once(&mut wait), Poll::Ready(Ok(())));
    }

    #[test]
    fn wait_on_an_unset_event_is_pending() {
        let event = ManualResetEvent::new(false);
        let mut wait = event.wait();
        assert!(poll_once(&mut wait).is_pending());
    }

    #[test]
    fn set_releases_all_waiters_together() {
        let event = ManualResetEvent::new(false);
        let (waker_a, wake_a) = counting_waker();
        let (waker_b, wake_b) = counting_waker();

        let mut first = event.wait();
        let mut second = event.wait();
        let mut cx_a = Context::from_waker(&waker_a);
        let mut cx_b = Context::from_waker(&waker_b);
        assert!(Pin::new(&mut first).poll(&mut cx_a).is_pending());
        assert!(Pin::new(&mut second).poll(&mut cx_b).is_pending());

        event.set();

        // Both were woken by the same set call, not one at a time.
        assert_eq!(wake_a.0.load(Ordering::SeqCst), 1);
        assert_eq!(wake_b.0.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut first).poll(&mut cx_a), Poll::Ready(Ok(())));
        assert_eq!(Pin::new(&mut second).poll(&mut cx_b), Poll::Ready(Ok(())));
    }

    #[test]
    fn set_is_idempotent() {
        let event = ManualResetEvent::new(false);
        event.set();
        event.set();
        assert!(event.is_set());
    }

    #[test]
    fn reset_rearms_the_gate_without_revoking_grants() {
        let event = ManualResetEvent::new(false);
        let mut early = event.wait();
        assert!(poll_once(&mut early).is_pending());

        event.set();
        event.reset();

        // The earlier waiter was already released by the set.
        assert_eq!(poll_once(&mut early), Poll::Ready(Ok(())));

        // New waits queue again.
        let mut late = event.wait();
        assert!(poll_once(&mut late).is_pending());
    }

    #[test]
    fn precancelled_wait_on_a_set_event_still_succeeds() {
        let event = ManualResetEvent::new(true);
        let token = CancellationToken::new();
        token.cancel();

        let mut wait = event.wait_with(token);
        assert_eq!(poll_once(&mut wait), Poll::Ready(Ok(())));
    }

    #[test]
    fn cancelled_wait_resolves_cancelled() {
        let event = ManualResetEvent::new(false);
        let token = CancellationToken::new();

        let mut wait = event.wait_with(token.clone());
        assert!(poll_once(&mut wait).is_pending());

        token.cancel();
        assert_eq!(
            poll_once(&mut wait),
            Poll::Ready(Err(AcquireError::Cancelled))
        );
    }
}
