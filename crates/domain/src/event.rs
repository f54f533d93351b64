//! Event data as consumed by the allocator.
//!
//! Events are owned by an external event store; the core only reads
//! `capacity`, `status`, `starts_at` and `price_cents`.

use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Publication state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventStatus {
    #[default]
    Draft,
    Published,
    Cancelled,
    Completed,
}

impl EventStatus {
    /// Only published events accept registrations.
    pub fn accepts_registrations(&self) -> bool {
        matches!(self, EventStatus::Published)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "DRAFT",
            EventStatus::Published => "PUBLISHED",
            EventStatus::Cancelled => "CANCELLED",
            EventStatus::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(EventStatus::Draft),
            "PUBLISHED" => Ok(EventStatus::Published),
            "CANCELLED" => Ok(EventStatus::Cancelled),
            "COMPLETED" => Ok(EventStatus::Completed),
            other => Err(DomainError::UnknownStatus {
                kind: "event",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The slice of an event the allocator works against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    /// Maximum simultaneously occupying (pending + confirmed) registrations.
    pub capacity: i32,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    /// Zero means the event is free and registrations confirm immediately.
    pub price_cents: i64,
}

impl EventRecord {
    /// True while the event can still take registration attempts.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status.accepts_registrations() && now < self.starts_at
    }

    /// True when confirming a registration requires a payment signal.
    pub fn requires_payment(&self) -> bool {
        self.price_cents > 0
    }
}
