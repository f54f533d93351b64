//! Durable coordination store for the capacity allocator.
//!
//! All shared mutable state — active registration counts, waitlist
//! positions, the promotion outbox — lives behind the
//! [`AllocatorStore`] trait. Two implementations are provided:
//! [`PostgresStore`] for production and [`InMemoryStore`] for tests
//! and local runs. Both linearize per-event mutations so that two
//! concurrent requests can never both take the last seat.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    AllocatorStore, CancelOutcome, ConfirmOutcome, ConvertOutcome, EnqueueOutcome, EventStats,
    PROMOTION_JOB_LEASE_SECS, ParticipantStatus, PaymentFailOutcome, PromotionJob,
    ReservationOutcome, SkipReason,
};
