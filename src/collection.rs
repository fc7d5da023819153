//! Bounded async producer/consumer collection.
//!
//! [`AsyncCollection`] hands items from producers to consumers in FIFO
//! order. Space and item availability are each tracked by a
//! [`Semaphore`], so a full collection suspends producers and an empty one
//! suspends consumers, without blocking a thread in either case. Once
//! [`complete_adding`](AsyncCollection::complete_adding) is called the
//! collection drains: takes succeed while items remain and fail with
//! [`CollectionError::Completed`] afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_coordination::AsyncCollection;
//!
//! # async fn example() {
//! let queue = AsyncCollection::with_capacity(16);
//!
//! let producer = queue.clone();
//! compio::runtime::spawn(async move {
//!     for i in 0..100 {
//!         producer.add(i).await.unwrap();
//!     }
//!     producer.complete_adding();
//! });
//!
//! while let Ok(item) = queue.take().await {
//!     println!("got {}", item);
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use compio_sync::{AcquireError, ManualResetEvent, Semaphore, Wait};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::error::CollectionError;

/// An async, optionally bounded, FIFO producer/consumer collection.
///
/// The handle is cheap to clone; clones share the same store. An unbounded
/// collection has capacity `u64::MAX`.
pub struct AsyncCollection<T> {
    inner: Arc<CollectionInner<T>>,
}

struct CollectionInner<T> {
    store: Mutex<Store<T>>,
    /// Permits for free slots: `capacity - occupancy`.
    space: Semaphore,
    /// Permits for stored items: one per item not yet claimed by a taker.
    items: Semaphore,
    /// Latched once adding is complete; never reverts.
    completed: ManualResetEvent,
    capacity: u64,
}

struct Store<T> {
    items: VecDeque<T>,
    /// Tasks watching for a store-condition change (item added, adding
    /// completed, store drained after completion).
    watchers: WakerSet,
}

impl<T> AsyncCollection<T> {
    /// Create an unbounded collection.
    #[must_use]
    pub fn new() -> Self {
        Self::build(VecDeque::new(), u64::MAX)
    }

    /// Create a collection holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        assert!(capacity > 0, "collection capacity must be at least 1");
        Self::build(VecDeque::new(), capacity)
    }

    /// Create an unbounded collection pre-populated from `seed`.
    ///
    /// Items are taken in seed order.
    #[must_use]
    pub fn seeded<I>(seed: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::build(seed.into_iter().collect(), u64::MAX)
    }

    /// Create a bounded collection pre-populated from `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the seed holds more than `capacity`
    /// items; nothing is constructed in either case.
    #[must_use]
    pub fn seeded_with_capacity<I>(seed: I, capacity: u64) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        assert!(capacity > 0, "collection capacity must be at least 1");
        let items: VecDeque<T> = seed.into_iter().collect();
        assert!(
            items.len() as u64 <= capacity,
            "seed holds more items than the collection capacity"
        );
        Self::build(items, capacity)
    }

    fn build(items: VecDeque<T>, capacity: u64) -> Self {
        let occupancy = items.len() as u64;
        Self {
            inner: Arc::new(CollectionInner {
                space: Semaphore::new(capacity - occupancy),
                items: Semaphore::new(occupancy),
                completed: ManualResetEvent::new(false),
                store: Mutex::new(Store {
                    items,
                    watchers: WakerSet::default(),
                }),
                capacity,
            }),
        }
    }

    /// True once [`complete_adding`](Self::complete_adding) has been called.
    #[must_use]
    pub fn is_adding_completed(&self) -> bool {
        self.inner.completed.is_set()
    }

    /// Add an item, waiting asynchronously while the collection is full.
    ///
    /// # Errors
    ///
    /// Fails with [`CollectionError::Completed`] if adding has been marked
    /// complete; the item is not stored.
    pub async fn add(&self, item: T) -> Result<(), CollectionError> {
        self.add_impl(item, None).await
    }

    /// Like [`add`](Self::add), abandoning the wait for space when `token`
    /// fires. A cancelled add stores nothing and consumes no slot.
    pub async fn add_with(
        &self,
        item: T,
        token: CancellationToken,
    ) -> Result<(), CollectionError> {
        self.add_impl(item, Some(token)).await
    }

    async fn add_impl(
        &self,
        item: T,
        token: Option<CancellationToken>,
    ) -> Result<(), CollectionError> {
        if self.inner.completed.is_set() {
            return Err(CollectionError::Completed);
        }
        let wait = match token {
            Some(token) => self.inner.space.wait_with(token),
            None => self.inner.space.wait(),
        };
        wait.await.map_err(|_| CollectionError::Cancelled)?;

        // One slot is held. Entry and completion are serialized by the store
        // lock, so an add can never slip in behind complete_adding.
        {
            let mut store = self.lock_store();
            if self.inner.completed.is_set() {
                drop(store);
                // Hand the unused slot back; bounded by capacity, so the
                // release cannot overflow.
                let _ = self.inner.space.add_permits(1);
                return Err(CollectionError::Completed);
            }
            store.items.push_back(item);
            store.watchers.wake_all();
        }
        // The item is visible: hand one item permit to the takers.
        let _ = self.inner.items.add_permits(1);
        Ok(())
    }

    /// Take the oldest item, waiting asynchronously while the collection is
    /// empty.
    ///
    /// # Errors
    ///
    /// Fails with [`CollectionError::Completed`] once the collection is
    /// completed and drained, and with [`CollectionError::Cancelled`] if the
    /// wait is abandoned; neither outcome consumes an item.
    pub fn take(&self) -> Take<T> {
        Take {
            inner: Arc::clone(&self.inner),
            wait: self.inner.items.wait(),
            watch: None,
            finished: false,
        }
    }

    /// Like [`take`](Self::take), abandoning the wait when `token` fires.
    pub fn take_with(&self, token: CancellationToken) -> Take<T> {
        Take {
            inner: Arc::clone(&self.inner),
            wait: self.inner.items.wait_with(token),
            watch: None,
            finished: false,
        }
    }

    /// Mark the collection as complete for adding.
    ///
    /// Idempotent. Every task blocked in [`take`](Self::take) or
    /// [`output_available`](Self::output_available) is woken so it can
    /// re-evaluate against the remaining items or the drained state.
    pub fn complete_adding(&self) {
        let mut store = self.lock_store();
        if self.inner.completed.is_set() {
            return;
        }
        self.inner.completed.set();
        debug!(remaining = store.items.len(), "collection adding completed");
        store.watchers.wake_all();
    }

    /// Wait until an item is available or the collection is drained.
    ///
    /// Resolves `true` as soon as an item can be taken, without consuming
    /// it, and `false` once the collection is completed and empty. Stays
    /// pending while the collection is merely empty.
    pub fn output_available(&self) -> OutputAvailable<T> {
        self.output_available_internal(None)
    }

    /// Like [`output_available`](Self::output_available), abandoning the
    /// wait when `token` fires.
    pub fn output_available_with(&self, token: CancellationToken) -> OutputAvailable<T> {
        self.output_available_internal(Some(token))
    }

    fn output_available_internal(&self, token: Option<CancellationToken>) -> OutputAvailable<T> {
        OutputAvailable {
            inner: Arc::clone(&self.inner),
            token,
            cancelled: None,
            watch: None,
            finished: false,
        }
    }

    /// Thread-blocking bridge for [`add`](Self::add), for producers without
    /// access to the async model.
    ///
    /// Blocks the calling thread; calling it from a scheduler thread risks
    /// deadlock.
    pub fn blocking_add(&self, item: T) -> Result<(), CollectionError> {
        futures::executor::block_on(self.add(item))
    }

    /// Thread-blocking bridge for [`take`](Self::take).
    ///
    /// Blocks the calling thread; calling it from a scheduler thread risks
    /// deadlock.
    pub fn blocking_take(&self) -> Result<T, CollectionError> {
        futures::executor::block_on(self.take())
    }

    /// Consume this handle into a lazy, forward-only stream of items.
    ///
    /// The stream performs the equivalent of "wait for output, then take"
    /// and ends, without error, exactly when completion is observed with no
    /// remaining items.
    #[must_use]
    pub fn into_stream(self) -> CollectionStream<T> {
        CollectionStream {
            collection: self,
            current: None,
        }
    }

    /// Like [`into_stream`](Self::into_stream), keeping this handle usable.
    #[must_use]
    pub fn stream(&self) -> CollectionStream<T> {
        self.clone().into_stream()
    }

    fn lock_store(&self) -> MutexGuard<'_, Store<T>> {
        self.inner.store.lock().expect("collection store poisoned")
    }
}

impl<T> Clone for AsyncCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for AsyncCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.lock_store().items.len();
        f.debug_struct("AsyncCollection")
            .field("capacity", &self.inner.capacity)
            .field("len", &len)
            .field("completed", &self.inner.completed.is_set())
            .finish_non_exhaustive()
    }
}

fn lock_store_of<T>(inner: &CollectionInner<T>) -> MutexGuard<'_, Store<T>> {
    inner.store.lock().expect("collection store poisoned")
}

/// Future returned by [`AsyncCollection::take`] and
/// [`AsyncCollection::take_with`].
#[must_use = "futures do nothing unless polled"]
pub struct Take<T> {
    inner: Arc<CollectionInner<T>>,
    wait: Wait,
    watch: Option<WatchKey>,
    finished: bool,
}

impl<T> Future for Take<T> {
    type Output = Result<T, CollectionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.finished, "Take polled after completion");

        // An item permit settles it: availability beats both completion and
        // cancellation.
        match Pin::new(&mut this.wait).poll(cx) {
            Poll::Ready(Ok(())) => {
                let item = {
                    let mut store = lock_store_of(&this.inner);
                    if let Some(key) = this.watch.take() {
                        store.watchers.remove(key);
                    }
                    let item = store
                        .items
                        .pop_front()
                        .expect("item permit granted for an empty store");
                    if this.inner.completed.is_set() && store.items.is_empty() {
                        // Last item gone: remaining takers observe drained.
                        store.watchers.wake_all();
                    }
                    item
                };
                // Bounded by capacity, cannot overflow.
                let _ = this.inner.space.add_permits(1);
                this.finished = true;
                Poll::Ready(Ok(item))
            }
            Poll::Ready(Err(AcquireError::Cancelled)) => {
                let mut store = lock_store_of(&this.inner);
                if let Some(key) = this.watch.take() {
                    store.watchers.remove(key);
                }
                this.finished = true;
                if this.inner.completed.is_set() && store.items.is_empty() {
                    // The drained state outranks a simultaneous cancellation.
                    Poll::Ready(Err(CollectionError::Completed))
                } else {
                    Poll::Ready(Err(CollectionError::Cancelled))
                }
            }
            Poll::Pending => {
                let mut store = lock_store_of(&this.inner);
                if this.inner.completed.is_set() && store.items.is_empty() {
                    if let Some(key) = this.watch.take() {
                        store.watchers.remove(key);
                    }
                    this.finished = true;
                    return Poll::Ready(Err(CollectionError::Completed));
                }
                store.watchers.register(&mut this.watch, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Take<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(key) = self.watch.take() {
            lock_store_of(&self.inner).watchers.remove(key);
        }
        // The inner `wait` future returns any permit granted in the race
        // window when it drops right after this.
    }
}

/// Future returned by [`AsyncCollection::output_available`] and
/// [`AsyncCollection::output_available_with`].
#[must_use = "futures do nothing unless polled"]
pub struct OutputAvailable<T> {
    inner: Arc<CollectionInner<T>>,
    token: Option<CancellationToken>,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    watch: Option<WatchKey>,
    finished: bool,
}

impl<T> Future for OutputAvailable<T> {
    type Output = Result<bool, CollectionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.finished, "OutputAvailable polled after completion");

        let mut store = lock_store_of(&this.inner);
        let settled = if !store.items.is_empty() {
            // Observed without consuming: no item permit is touched.
            Some(Ok(true))
        } else if this.inner.completed.is_set() {
            Some(Ok(false))
        } else if poll_token(&this.token, &mut this.cancelled, cx) {
            Some(Err(CollectionError::Cancelled))
        } else {
            None
        };

        match settled {
            Some(result) => {
                if let Some(key) = this.watch.take() {
                    store.watchers.remove(key);
                }
                this.finished = true;
                Poll::Ready(result)
            }
            None => {
                store.watchers.register(&mut this.watch, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for OutputAvailable<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(key) = self.watch.take() {
            lock_store_of(&self.inner).watchers.remove(key);
        }
    }
}

/// Poll an optional cancellation token, arming the subscription lazily.
fn poll_token(
    token: &Option<CancellationToken>,
    cancelled: &mut Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    cx: &mut Context<'_>,
) -> bool {
    let Some(token) = token else {
        return false;
    };
    let armed = cancelled.get_or_insert_with(|| Box::pin(token.clone().cancelled_owned()));
    armed.as_mut().poll(cx).is_ready()
}

/// Lazy stream of collection items; see [`AsyncCollection::into_stream`].
#[must_use = "streams do nothing unless polled"]
pub struct CollectionStream<T> {
    collection: AsyncCollection<T>,
    current: Option<Take<T>>,
}

impl<T> futures::Stream for CollectionStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let take = this
            .current
            .get_or_insert_with(|| this.collection.take());
        match Pin::new(take).poll(cx) {
            Poll::Ready(Ok(item)) => {
                this.current = None;
                Poll::Ready(Some(item))
            }
            Poll::Ready(Err(_)) => {
                // Only the drained outcome is reachable without a token; the
                // stream ends without error.
                this.current = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

type WatchKey = u64;

/// Registry of tasks waiting for a store-condition change.
///
/// Unlike the wait queue, a wake here resolves nothing: woken tasks
/// re-evaluate their condition and re-register if it still does not hold.
#[derive(Debug, Default)]
struct WakerSet {
    entries: Vec<(WatchKey, Waker)>,
    next_key: WatchKey,
}

impl WakerSet {
    fn register(&mut self, slot: &mut Option<WatchKey>, waker: &Waker) {
        if let Some(key) = *slot {
            if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
                entry.1.clone_from(waker);
                return;
            }
        }
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        self.entries.push((key, waker.clone()));
        *slot = Some(key);
    }

    fn remove(&mut self, key: WatchKey) {
        self.entries.retain(|(k, _)| *k != key);
    }

    fn wake_all(&mut self) {
        for (_, waker) in self.entries.drain(..) {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::task::Waker;

    fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        future.poll(&mut cx)
    }

    #[test]
    #[should_panic(expected = "collection capacity must be at least 1")]
    fn zero_capacity_panics() {
        let _collection = AsyncCollection::<i32>::with_capacity(0);
    }

    #[test]
    #[should_panic(expected = "collection capacity must be at least 1")]
    fn zero_capacity_with_seed_panics() {
        let _collection = AsyncCollection::seeded_with_capacity(Vec::<i32>::new(), 0);
    }

    #[test]
    #[should_panic(expected = "seed holds more items than the collection capacity")]
    fn seed_larger_than_capacity_panics() {
        let _collection = AsyncCollection::seeded_with_capacity(vec![3, 5], 1);
    }

    #[test]
    fn seeded_items_come_out_in_order() {
        let collection = AsyncCollection::seeded(vec![3, 5, 7]);

        for expected in [3, 5, 7] {
            let mut take = pin!(collection.take());
            assert_eq!(poll_once(take.as_mut()), Poll::Ready(Ok(expected)));
        }
    }

    #[test]
    fn add_after_complete_fails() {
        let collection = AsyncCollection::new();
        collection.complete_adding();

        let mut add = pin!(collection.add(3));
        assert_eq!(
            poll_once(add.as_mut()),
            Poll::Ready(Err(CollectionError::Completed))
        );
    }

    #[test]
    fn take_from_empty_completed_collection_fails() {
        let collection = AsyncCollection::<i32>::new();
        collection.complete_adding();

        let mut take = pin!(collection.take());
        assert_eq!(
            poll_once(take.as_mut()),
            Poll::Ready(Err(CollectionError::Completed))
        );
    }

    #[test]
    fn complete_adding_is_idempotent() {
        let collection = AsyncCollection::<i32>::new();
        collection.complete_adding();
        collection.complete_adding();
        assert!(collection.is_adding_completed());
    }

    #[test]
    fn take_waits_until_an_item_arrives() {
        let collection = AsyncCollection::new();

        let mut take = pin!(collection.take());
        assert!(poll_once(take.as_mut()).is_pending());

        let mut add = pin!(collection.add(13));
        assert_eq!(poll_once(add.as_mut()), Poll::Ready(Ok(())));
        assert_eq!(poll_once(take.as_mut()), Poll::Ready(Ok(13)));
    }

    #[test]
    fn add_to_a_full_collection_waits_for_a_take() {
        let collection = AsyncCollection::seeded_with_capacity(vec![13], 1);

        let mut add = pin!(collection.add(7));
        assert!(poll_once(add.as_mut()).is_pending());

        let mut take = pin!(collection.take());
        assert_eq!(poll_once(take.as_mut()), Poll::Ready(Ok(13)));
        assert_eq!(poll_once(add.as_mut()), Poll::Ready(Ok(())));

        let mut second_take = pin!(collection.take());
        assert_eq!(poll_once(second_take.as_mut()), Poll::Ready(Ok(7)));
    }

    #[test]
    fn cancelled_take_does_not_lose_an_item() {
        let collection = AsyncCollection::new();
        let token = CancellationToken::new();

        let mut take = pin!(collection.take_with(token.clone()));
        assert!(poll_once(take.as_mut()).is_pending());

        token.cancel();
        assert_eq!(
            poll_once(take.as_mut()),
            Poll::Ready(Err(CollectionError::Cancelled))
        );

        // The item added afterwards goes to the next taker untouched.
        let mut add = pin!(collection.add(5));
        assert_eq!(poll_once(add.as_mut()), Poll::Ready(Ok(())));
        let mut next = pin!(collection.take());
        assert_eq!(poll_once(next.as_mut()), Poll::Ready(Ok(5)));
    }

    #[test]
    fn cancelled_add_does_not_consume_a_slot() {
        let collection = AsyncCollection::seeded_with_capacity(vec![13], 1);
        let token = CancellationToken::new();

        let mut add = pin!(collection.add_with(7, token.clone()));
        assert!(poll_once(add.as_mut()).is_pending());

        token.cancel();
        assert_eq!(
            poll_once(add.as_mut()),
            Poll::Ready(Err(CollectionError::Cancelled))
        );

        // The slot freed by this take is still available to a later add.
        let mut take = pin!(collection.take());
        assert_eq!(poll_once(take.as_mut()), Poll::Ready(Ok(13)));
        let mut add2 = pin!(collection.add(9));
        assert_eq!(poll_once(add2.as_mut()), Poll::Ready(Ok(())));
    }

    #[test]
    fn output_available_reflects_items_and_completion() {
        let collection = AsyncCollection::new();

        let mut pending = pin!(collection.output_available());
        assert!(poll_once(pending.as_mut()).is_pending());

        let mut add = pin!(collection.add(13));
        assert_eq!(poll_once(add.as_mut()), Poll::Ready(Ok(())));
        assert_eq!(poll_once(pending.as_mut()), Poll::Ready(Ok(true)));

        // Observing did not consume the item.
        let mut take = pin!(collection.take());
        assert_eq!(poll_once(take.as_mut()), Poll::Ready(Ok(13)));

        collection.complete_adding();
        let mut drained = pin!(collection.output_available());
        assert_eq!(poll_once(drained.as_mut()), Poll::Ready(Ok(false)));
    }

    #[test]
    fn pending_output_available_resolves_false_on_completion() {
        let collection = AsyncCollection::<i32>::new();

        let mut watch = pin!(collection.output_available());
        assert!(poll_once(watch.as_mut()).is_pending());

        collection.complete_adding();
        assert_eq!(poll_once(watch.as_mut()), Poll::Ready(Ok(false)));
    }

    #[test]
    fn output_available_true_when_completed_with_items() {
        let collection = AsyncCollection::seeded(vec![13]);
        collection.complete_adding();

        let mut watch = pin!(collection.output_available());
        assert_eq!(poll_once(watch.as_mut()), Poll::Ready(Ok(true)));
    }

    #[test]
    fn pending_takers_fail_once_completed_and_drained() {
        let collection = AsyncCollection::seeded(vec![1]);

        let mut first = pin!(collection.take());
        let mut second = pin!(collection.take());
        assert_eq!(poll_once(first.as_mut()), Poll::Ready(Ok(1)));
        assert!(poll_once(second.as_mut()).is_pending());

        collection.complete_adding();
        assert_eq!(
            poll_once(second.as_mut()),
            Poll::Ready(Err(CollectionError::Completed))
        );
    }
}
