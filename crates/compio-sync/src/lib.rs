//! Async synchronization primitives for compio runtime
//!
//! This crate provides async coordination primitives that are compatible
//! with the [compio](https://github.com/compio-rs/compio) async runtime.
//! Waiting never blocks a thread, waiters are served strictly FIFO, and
//! every wait cooperates with cancellation through
//! [`tokio_util::sync::CancellationToken`]: a grant and a cancellation
//! racing for the same waiter are resolved under a single lock, so exactly
//! one of them wins and a cancelled wait never consumes anything.
//!
//! # Primitives
//!
//! - [`Semaphore`] - Async counting semaphore with FIFO waiters
//! - [`ManualResetEvent`] - Broadcast signal releasing all waiters at once
//! - [`PauseTokenSource`] / [`PauseToken`] - Cooperative pause gate
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::Semaphore;
//!
//! #[compio::main]
//! async fn main() {
//!     let sem = Semaphore::new(100);
//!
//!     // Spawn many tasks, but only 100 run concurrently
//!     for i in 0..1000 {
//!         let sem = sem.clone();
//!         compio::runtime::spawn(async move {
//!             let _permit = sem.acquire().await.unwrap();
//!             println!("Task {}", i);
//!         });
//!     }
//! }
//! ```

mod cancel;
mod error;
mod event;
mod id;
mod pause;
mod semaphore;
mod wait_queue;

pub use error::{AcquireError, OverflowError};
pub use event::{EventWait, ManualResetEvent};
pub use pause::{PauseToken, PauseTokenSource, WaitWhilePaused};
pub use semaphore::{Acquire, Semaphore, SemaphorePermit, Wait};
