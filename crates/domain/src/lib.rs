//! Domain model for the event capacity and waitlist allocator.
//!
//! Pure types and state machines only; persistence lives in the
//! `store` crate and orchestration in the `allocator` crate.

pub mod error;
pub mod event;
pub mod registration;
pub mod waitlist;

pub use error::DomainError;
pub use event::{EventRecord, EventStatus};
pub use registration::{Registration, RegistrationStatus};
pub use waitlist::{WaitlistEntry, WaitlistStatus};
