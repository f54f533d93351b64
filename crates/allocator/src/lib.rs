//! Seat allocation service for capacity-bounded events.
//!
//! This crate sits between the HTTP surface and the store. It owns
//! the registration flow (reserve, waitlist fallback, payment
//! confirmation), cancellation with waitlist promotion, the expiry
//! sweep for unpaid registrations, and the background workers that
//! drive both.

pub mod error;
pub mod notify;
pub mod retry;
pub mod service;
pub mod workers;

pub use error::AllocatorError;
pub use notify::{
    InMemoryNotificationService, NotificationIntent, NotificationService, TracingNotifier,
};
pub use retry::RetryPolicy;
pub use service::{Allocator, AllocatorConfig, PromotionReport, RegisterOutcome};
pub use workers::{ExpirySweeper, PromotionWorker};
