//! HTTP route handlers.

pub mod events;
pub mod ops;
pub mod payments;
pub mod registrations;
