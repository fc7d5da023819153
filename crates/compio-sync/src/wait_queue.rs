//! FIFO wait queue shared by the semaphore and event primitives.
//!
//! The queue itself is plain data: the owning primitive wraps it, together
//! with its counters, in a single `std::sync::Mutex`, so every grant/cancel
//! race is decided under one exclusion section. A waiter resolves exactly
//! once: `Pending` either moves to `Granted` or is removed by cancellation,
//! never both.
//!
//! FIFO ordering is deliberate: earlier requesters are served first, which
//! prevents starvation under sustained contention.

use std::collections::VecDeque;
use std::task::Waker;

/// Key identifying one waiter within its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterKey(u64);

/// Resolution state of a queued waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaiterState {
    /// Queued, not yet resolved.
    Pending,
    /// Resolved by a grant; stays queued until its future observes it.
    Granted,
}

#[derive(Debug)]
struct Waiter {
    key: WaiterKey,
    state: WaiterState,
    waker: Waker,
}

/// FIFO list of pending requests, each resolvable exactly once.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    entries: VecDeque<Waiter>,
    next_key: u64,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Link a new pending waiter at the tail and return its key.
    pub(crate) fn enqueue(&mut self, waker: Waker) -> WaiterKey {
        let key = WaiterKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);
        self.entries.push_back(Waiter {
            key,
            state: WaiterState::Pending,
            waker,
        });
        key
    }

    /// Refresh the waker of a waiter that is still queued.
    pub(crate) fn register(&mut self, key: WaiterKey, waker: &Waker) {
        if let Some(waiter) = self.entries.iter_mut().find(|w| w.key == key) {
            waiter.waker.clone_from(waker);
        }
    }

    /// Cancel a waiter that is still pending.
    ///
    /// Returns true if the waiter was pending and has been removed. A waiter
    /// that was already granted (or already gone) is left untouched and false
    /// is returned, so a cancellation racing a grant has exactly one outcome.
    pub(crate) fn try_cancel(&mut self, key: WaiterKey) -> bool {
        match self.entries.iter().position(|w| w.key == key) {
            Some(index) if self.entries[index].state == WaiterState::Pending => {
                self.entries.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Grant the oldest pending waiter and wake it.
    ///
    /// The waiter stays queued as `Granted` until its future observes the
    /// grant through [`take`](Self::take), so a concurrent cancel or drop can
    /// still see that the grant happened first. Returns false if no pending
    /// waiter exists.
    pub(crate) fn grant_one(&mut self) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|w| w.state == WaiterState::Pending)
        {
            Some(waiter) => {
                waiter.state = WaiterState::Granted;
                waiter.waker.wake_by_ref();
                true
            }
            None => false,
        }
    }

    /// Grant every pending waiter at once (broadcast release).
    pub(crate) fn grant_all(&mut self) -> usize {
        let mut granted = 0;
        for waiter in self
            .entries
            .iter_mut()
            .filter(|w| w.state == WaiterState::Pending)
        {
            waiter.state = WaiterState::Granted;
            waiter.waker.wake_by_ref();
            granted += 1;
        }
        granted
    }

    /// Remove a waiter outright, reporting the state it was in.
    ///
    /// Used when a future completes or is dropped. A `Granted` result on the
    /// drop path means the caller still owes the grant back to its pool.
    pub(crate) fn take(&mut self, key: WaiterKey) -> Option<WaiterState> {
        let index = self.entries.iter().position(|w| w.key == key)?;
        self.entries.remove(index).map(|w| w.state)
    }

    /// Resolution state of a waiter, if it is still queued.
    pub(crate) fn state(&self, key: WaiterKey) -> Option<WaiterState> {
        self.entries.iter().find(|w| w.key == key).map(|w| w.state)
    }

    /// True if any waiter is still pending (granted entries do not count).
    pub(crate) fn has_pending(&self) -> bool {
        self.entries.iter().any(|w| w.state == WaiterState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    fn queue_with(n: usize) -> (WaitQueue, Vec<WaiterKey>) {
        let mut queue = WaitQueue::new();
        let keys = (0..n).map(|_| queue.enqueue(Waker::noop().clone())).collect();
        (queue, keys)
    }

    #[test]
    fn grants_in_fifo_order() {
        let (mut queue, keys) = queue_with(3);

        assert!(queue.grant_one());
        assert_eq!(queue.state(keys[0]), Some(WaiterState::Granted));
        assert_eq!(queue.state(keys[1]), Some(WaiterState::Pending));

        assert!(queue.grant_one());
        assert_eq!(queue.state(keys[1]), Some(WaiterState::Granted));
        assert_eq!(queue.state(keys[2]), Some(WaiterState::Pending));
    }

    #[test]
    fn grant_one_without_pending_waiters_is_false() {
        let (mut queue, _keys) = queue_with(1);
        assert!(queue.grant_one());
        assert!(!queue.grant_one());
    }

    #[test]
    fn cancel_pending_removes_it() {
        let (mut queue, keys) = queue_with(2);

        assert!(queue.try_cancel(keys[0]));
        assert_eq!(queue.state(keys[0]), None);

        // The grant now goes to the next waiter in line.
        assert!(queue.grant_one());
        assert_eq!(queue.state(keys[1]), Some(WaiterState::Granted));
    }

    #[test]
    fn cancel_after_grant_is_a_noop() {
        let (mut queue, keys) = queue_with(1);
        assert!(queue.grant_one());

        assert!(!queue.try_cancel(keys[0]));
        assert_eq!(queue.state(keys[0]), Some(WaiterState::Granted));
    }

    #[test]
    fn grant_all_resolves_every_pending_waiter() {
        let (mut queue, keys) = queue_with(3);
        assert!(queue.try_cancel(keys[1]));

        assert_eq!(queue.grant_all(), 2);
        assert_eq!(queue.state(keys[0]), Some(WaiterState::Granted));
        assert_eq!(queue.state(keys[2]), Some(WaiterState::Granted));
        assert_eq!(queue.grant_all(), 0);
    }

    #[test]
    fn take_reports_the_state_the_waiter_was_in() {
        let (mut queue, keys) = queue_with(2);
        assert!(queue.grant_one());

        assert_eq!(queue.take(keys[0]), Some(WaiterState::Granted));
        assert_eq!(queue.take(keys[1]), Some(WaiterState::Pending));
        assert_eq!(queue.take(keys[0]), None);
        assert!(!queue.has_pending());
    }
}
