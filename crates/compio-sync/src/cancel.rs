//! Cancellation subscription helper shared by the wait futures.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Lazily armed subscription to a cancellation token.
///
/// The subscription is only armed once a wait actually queues, so a wait that
/// completes synchronously never registers with the token at all.
pub(crate) struct CancelWatch {
    token: Option<CancellationToken>,
    armed: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
}

impl CancelWatch {
    pub(crate) fn new(token: Option<CancellationToken>) -> Self {
        Self { token, armed: None }
    }

    /// True if the token is already cancelled, without subscribing.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Poll the subscription, arming it on first use.
    ///
    /// Returns true once the token is cancelled. The caller decides whether
    /// the cancellation still wins: it may have lost the race to a grant.
    pub(crate) fn poll_cancelled(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(token) = &self.token else {
            return false;
        };
        let armed = self
            .armed
            .get_or_insert_with(|| Box::pin(token.clone().cancelled_owned()));
        armed.as_mut().poll(cx).is_ready()
    }
}
