//! Error types for compio-sync primitives.

use thiserror::Error;

/// A cancellable wait resolved as cancelled instead of granted.
///
/// Cancellation is a distinct outcome from success and failure: a cancelled
/// wait leaves every counter exactly as if the wait had never been issued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The wait was cancelled before it was granted.
    #[error("wait cancelled before it was granted")]
    Cancelled,
}

/// Releasing permits would overflow the counter; state was left unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("releasing {requested} permits would overflow the counter ({available} available)")]
pub struct OverflowError {
    /// Number of permits the failed release asked for.
    pub requested: u64,
    /// Permits available at the moment the release was refused.
    pub available: u64,
}
