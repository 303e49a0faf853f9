use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier.
///
/// Identifier which is guaranteed to be unique during the program run. It is
/// intentionally kept opaque and exists only to compare runtime entities,
/// such as two reply waits registered on the same channel at different times.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct UniqueId(u64);

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(0);

impl UniqueId {
    /// Generates a unique identifier.
    pub fn new() -> Self {
        Self(NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}
