//! Registration lifecycle state machine.

use chrono::{DateTime, Utc};
use common::{EventId, RegistrationId, TicketType, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The state of a registration in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Cancelled
///    │                          ▲
///    └──────────────────────────┘
/// ```
///
/// Pending and Confirmed both occupy a seat; Cancelled is terminal and
/// frees one. Registrations are never deleted, only marked Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RegistrationStatus {
    /// Seat reserved, awaiting payment or expiry.
    #[default]
    Pending,

    /// Seat held until the event or an explicit cancellation.
    Confirmed,

    /// Released the seat (terminal state).
    Cancelled,
}

impl RegistrationStatus {
    /// True while the registration occupies a seat.
    pub fn is_active(&self) -> bool {
        matches!(self, RegistrationStatus::Pending | RegistrationStatus::Confirmed)
    }

    /// True if the registration can be confirmed from this state.
    pub fn can_confirm(&self) -> bool {
        matches!(self, RegistrationStatus::Pending)
    }

    /// True if the registration can be cancelled from this state.
    /// Cancelling from either active state frees a seat.
    pub fn can_cancel(&self) -> bool {
        self.is_active()
    }

    /// True if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationStatus::Cancelled)
    }

    /// Checks a transition against the state machine.
    pub fn validate_transition(&self, to: RegistrationStatus) -> Result<(), DomainError> {
        let allowed = match (self, to) {
            (RegistrationStatus::Pending, RegistrationStatus::Confirmed) => true,
            (RegistrationStatus::Pending, RegistrationStatus::Cancelled) => true,
            (RegistrationStatus::Confirmed, RegistrationStatus::Cancelled) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "PENDING",
            RegistrationStatus::Confirmed => "CONFIRMED",
            RegistrationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RegistrationStatus::Pending),
            "CONFIRMED" => Ok(RegistrationStatus::Confirmed),
            "CANCELLED" => Ok(RegistrationStatus::Cancelled),
            other => Err(DomainError::UnknownStatus {
                kind: "registration",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single registration attempt against an event.
///
/// At most one active registration may exist per (event, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub ticket_type: TicketType,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Creates a fresh pending registration.
    pub fn pending(
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegistrationId::new(),
            event_id,
            user_id,
            ticket_type,
            status: RegistrationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while this registration occupies a seat.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
