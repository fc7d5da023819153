//! Process-wide identifiers for coordination primitives.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next primitive id.
///
/// Ids are process-unique, non-zero and monotonically increasing. They exist
/// so log lines and test failures can be correlated with a specific
/// primitive instance; nothing else reads them.
pub(crate) fn next_id() -> NonZeroU64 {
    let raw = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    NonZeroU64::new(raw).expect("primitive id counter wrapped")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_nonzero_and_increasing() {
        let a = next_id();
        let b = next_id();
        assert!(a.get() > 0);
        assert!(b.get() > a.get());
    }
}
