//! Error handling and types

use thiserror::Error;

/// Errors from [`AsyncCollection`](crate::AsyncCollection) operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionError {
    /// Adding has been completed; taking additionally found the store
    /// drained. The collection is unchanged.
    #[error("collection has completed adding")]
    Completed,

    /// The wait was cancelled before the operation could proceed; no item
    /// or slot was consumed.
    #[error("collection operation cancelled")]
    Cancelled,
}

/// Errors from [`AsyncStream`](crate::AsyncStream) operations.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The operation was cancelled before or while it ran.
    #[error("stream operation cancelled")]
    Cancelled,

    /// Failure raised by the underlying resource, propagated unchanged.
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Check if the error is the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}
