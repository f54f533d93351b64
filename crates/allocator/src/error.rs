//! Error types for the allocator service layer.

use store::StoreError;
use thiserror::Error;

/// Errors surfaced by allocator operations.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// The store failed in a way retries cannot help with.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A transient store error kept recurring past the retry budget.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

impl AllocatorError {
    /// Returns true when the underlying failure was transient and the
    /// caller may reasonably try the whole operation again.
    pub fn is_transient(&self) -> bool {
        match self {
            AllocatorError::Store(e) => e.is_transient(),
            AllocatorError::RetriesExhausted { .. } => true,
        }
    }
}
