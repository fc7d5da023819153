//! Cooperative pause gate.
//!
//! A [`PauseTokenSource`] owns the paused flag; [`PauseToken`]s derived from
//! it are handed to the code that should honor pauses. Waiting while
//! unpaused costs nothing (the wait completes already-done, it is never
//! queued); unpausing releases every blocked waiter in one broadcast.
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::PauseTokenSource;
//!
//! # async fn example() {
//! let source = PauseTokenSource::new();
//! let token = source.token();
//!
//! source.set_paused(true);
//!
//! let worker = async move {
//!     loop {
//!         token.wait_while_paused().await.unwrap();
//!         // ... one unit of work ...
//!     }
//! };
//!
//! // Later: every waiter resumes at once.
//! source.set_paused(false);
//! # let _ = worker;
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AcquireError;
use crate::event::{EventWait, ManualResetEvent};

/// Owner of the paused flag; hands out [`PauseToken`]s.
///
/// The handle is cheap to clone; clones control the same gate.
#[derive(Clone, Debug)]
pub struct PauseTokenSource {
    // Set means "not paused": the event is the rebuildable broadcast signal
    // that releases all waiters when the gate opens.
    resumed: ManualResetEvent,
}

impl PauseTokenSource {
    /// Create a new, unpaused source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resumed: ManualResetEvent::new(true),
        }
    }

    /// True while the gate is armed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        !self.resumed.is_set()
    }

    /// Arm or disarm the gate.
    ///
    /// Arming makes future waits block; disarming releases every waiter
    /// currently blocked, simultaneously.
    pub fn set_paused(&self, paused: bool) {
        if paused {
            self.resumed.reset();
        } else {
            self.resumed.set();
        }
        debug!(gate = self.resumed.id().get(), paused, "pause gate switched");
    }

    /// Derive a token observers use to honor pauses.
    #[must_use]
    pub fn token(&self) -> PauseToken {
        PauseToken {
            resumed: Some(self.resumed.clone()),
        }
    }
}

impl Default for PauseTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable capability derived from a [`PauseTokenSource`].
///
/// The default token is attached to no source and never pauses.
#[derive(Clone, Debug, Default)]
pub struct PauseToken {
    resumed: Option<ManualResetEvent>,
}

impl PauseToken {
    /// True if this token can ever observe a pause.
    ///
    /// False only for the detached default token.
    #[must_use]
    pub fn can_be_paused(&self) -> bool {
        self.resumed.is_some()
    }

    /// True while the owning source is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.resumed.as_ref().is_some_and(|event| !event.is_set())
    }

    /// Wait until the owning source is unpaused.
    ///
    /// Completes immediately, without queuing, when currently unpaused.
    pub fn wait_while_paused(&self) -> WaitWhilePaused {
        WaitWhilePaused {
            wait: self.resumed.as_ref().map(ManualResetEvent::wait),
        }
    }

    /// Like [`wait_while_paused`](Self::wait_while_paused), abandoning the
    /// wait when `token` fires; unpausing and cancellation race under the
    /// gate's lock and exactly one of them wins.
    pub fn wait_while_paused_with(&self, token: CancellationToken) -> WaitWhilePaused {
        WaitWhilePaused {
            wait: self
                .resumed
                .as_ref()
                .map(|event| event.wait_with(token)),
        }
    }
}

/// Future returned by [`PauseToken::wait_while_paused`].
#[must_use = "futures do nothing unless polled"]
pub struct WaitWhilePaused {
    // None for the detached default token, which never pauses.
    wait: Option<EventWait>,
}

impl Future for WaitWhilePaused {
    type Output = Result<(), AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut().wait.as_mut() {
            Some(wait) => Pin::new(wait).poll(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
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

    #[test]
    fn paused_flag_toggles() {
        let source = PauseTokenSource::new();
        assert!(!source.is_paused());
        source.set_paused(true);
        assert!(source.is_paused());
        source.set_paused(false);
        assert!(!source.is_paused());
    }

    #[test]
    fn token_observes_the_source() {
        let source = PauseTokenSource::new();
        let token = source.token();
        assert!(!token.is_paused());
        assert!(token.can_be_paused());
        source.set_paused(true);
        assert!(token.is_paused());
    }

    #[test]
    fn default_token_never_pauses() {
        let token = PauseToken::default();
        assert!(!token.can_be_paused());
        assert!(!token.is_paused());
        let mut wait = token.wait_while_paused();
        assert_eq!(poll_once(&mut wait), Poll::Ready(Ok(())));
    }

    #[test]
    fn wait_completes_immediately_when_unpaused() {
        let source = PauseTokenSource::new();
        let token = source.token();

        let mut wait = token.wait_while_paused();
        assert_eq!(poll_once(&mut wait), Poll::Ready(Ok(())));

        source.set_paused(true);
        let mut blocked = token.wait_while_paused();
        assert!(poll_once(&mut blocked).is_pending());

        source.set_paused(false);
        assert_eq!(poll_once(&mut blocked), Poll::Ready(Ok(())));
    }

    #[test]
    fn unpausing_releases_all_waiters_in_one_step() {
        let source = PauseTokenSource::new();
        let token = source.token();
        source.set_paused(true);

        let wake_a = Arc::new(CountingWake(AtomicUsize::new(0)));
        let wake_b = Arc::new(CountingWake(AtomicUsize::new(0)));
        let waker_a = Waker::from(wake_a.clone());
        let waker_b = Waker::from(wake_b.clone());

        let mut first = token.wait_while_paused();
        let mut second = token.wait_while_paused();
        let mut cx_a = Context::from_waker(&waker_a);
        let mut cx_b = Context::from_waker(&waker_b);
        assert!(Pin::new(&mut first).poll(&mut cx_a).is_pending());
        assert!(Pin::new(&mut second).poll(&mut cx_b).is_pending());

        source.set_paused(false);

        assert_eq!(wake_a.0.load(Ordering::SeqCst), 1);
        assert_eq!(wake_b.0.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut first).poll(&mut cx_a), Poll::Ready(Ok(())));
        assert_eq!(Pin::new(&mut second).poll(&mut cx_b), Poll::Ready(Ok(())));
    }

    #[test]
    fn cancellation_interrupts_a_paused_wait() {
        let source = PauseTokenSource::new();
        let token = source.token();
        let cancel = CancellationToken::new();

        source.set_paused(true);
        let mut wait = token.wait_while_paused_with(cancel.clone());
        assert!(poll_once(&mut wait).is_pending());

        cancel.cancel();
        assert_eq!(
            poll_once(&mut wait),
            Poll::Ready(Err(AcquireError::Cancelled))
        );

        // A fresh wait still honors the (still paused) gate.
        let mut again = token.wait_while_paused_with(cancel.clone());
        assert_eq!(
            poll_once(&mut again),
            Poll::Ready(Err(AcquireError::Cancelled))
        );
    }
}
