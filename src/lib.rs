//! compio-coordination: async coordination primitives for cooperative schedulers
//!
//! This library lets many concurrently scheduled tasks share a bounded
//! resource, hand off data producer/consumer style, and cooperatively
//! pause and resume, all without blocking an execution thread while
//! waiting and all interoperating race-free with cooperative cancellation.
//!
//! The low-level primitives (semaphore, broadcast event, pause gate) live
//! in the [`compio-sync`](compio_sync) crate and are re-exported here; this
//! crate adds the structures built on top of them:
//!
//! - [`AsyncCollection`] - bounded async producer/consumer collection
//! - [`AsyncStream`] / [`SynchronizedStream`] - byte-stream trait and the
//!   adapter that serializes concurrent callers against one resource

pub mod collection;
pub mod error;
pub mod stream;
pub mod synchronized;

// Re-export commonly used types
pub use collection::{AsyncCollection, CollectionStream, OutputAvailable, Take};
pub use compio_sync::{
    Acquire, AcquireError, EventWait, ManualResetEvent, OverflowError, PauseToken,
    PauseTokenSource, Semaphore, SemaphorePermit, Wait, WaitWhilePaused,
};
pub use error::{CollectionError, StreamError};
pub use stream::{AsyncStream, CallMode, PendingRead, PendingWrite};
pub use synchronized::{SynchronizedExt, SynchronizedStream};
