//! Shared identifier and ticket types used across the allocator crates.

mod types;

pub use types::{EventId, RegistrationId, TicketType, UserId, WaitlistEntryId};
