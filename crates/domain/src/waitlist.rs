//! Waitlist queue entry and its lifecycle.

use chrono::{DateTime, Utc};
use common::{EventId, TicketType, UserId, WaitlistEntryId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The state of a waitlist entry.
///
/// Entries start Active and leave the queue exactly once: converted
/// into a pending registration by the promotion trigger, expired by
/// housekeeping, or cancelled by the user. Positions are never
/// renumbered, so gaps are normal after cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WaitlistStatus {
    /// Waiting for a seat, ordered by position.
    #[default]
    Active,

    /// Promoted into a pending registration.
    Converted,

    /// Removed by housekeeping (e.g. the event ended).
    Expired,

    /// Withdrawn by the user.
    Cancelled,
}

impl WaitlistStatus {
    /// True while the entry holds a queue slot.
    pub fn is_active(&self) -> bool {
        matches!(self, WaitlistStatus::Active)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitlistStatus::Active => "ACTIVE",
            WaitlistStatus::Converted => "CONVERTED",
            WaitlistStatus::Expired => "EXPIRED",
            WaitlistStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for WaitlistStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(WaitlistStatus::Active),
            "CONVERTED" => Ok(WaitlistStatus::Converted),
            "EXPIRED" => Ok(WaitlistStatus::Expired),
            "CANCELLED" => Ok(WaitlistStatus::Cancelled),
            other => Err(DomainError::UnknownStatus {
                kind: "waitlist",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One requester queued for a seat on a full event.
///
/// At most one active entry may exist per (event, user) pair, and an
/// active entry is mutually exclusive with an active registration for
/// the same pair. `position` is unique per event and strictly
/// increasing in enqueue order; promotion follows ascending position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: WaitlistEntryId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub position: i64,
    pub status: WaitlistStatus,
    pub ticket_type: TicketType,
    pub created_at: DateTime<Utc>,
    pub converted_at: Option<DateTime<Utc>>,
}

impl WaitlistEntry {
    /// Creates a fresh active entry at the given position.
    pub fn active(
        event_id: EventId,
        user_id: UserId,
        position: i64,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WaitlistEntryId::new(),
            event_id,
            user_id,
            position,
            status: WaitlistStatus::Active,
            ticket_type,
            created_at: now,
            converted_at: None,
        }
    }

    /// True while this entry holds a queue slot.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
