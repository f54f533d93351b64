use common::EventId;
use thiserror::Error;

/// Errors surfaced by store implementations.
///
/// `Conflict` and `Timeout` are transient: the caller may retry the
/// whole operation. Logical outcomes (no capacity, already active,
/// …) are never errors; they are carried in the operation's outcome
/// enum instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lost a serialization or lock race; safe to retry.
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// Lock wait or statement exceeded its deadline; safe to retry.
    #[error("storage timeout: {0}")]
    Timeout(String),

    /// Any other database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row failed to decode into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The capacity invariant was observed broken. This indicates an
    /// isolation or logic bug and must never be swallowed.
    #[error("capacity invariant violated for event {event_id}: active {active} > capacity {capacity}")]
    InvariantViolation {
        event_id: EventId,
        active: i64,
        capacity: i32,
    },
}

impl StoreError {
    /// True if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict(_) | StoreError::Timeout(_) => true,
            StoreError::Database(e) => {
                matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
            }
            _ => false,
        }
    }
}

impl From<domain::DomainError> for StoreError {
    fn from(err: domain::DomainError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
