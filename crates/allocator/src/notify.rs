//! Notification service trait and in-memory implementation.
//!
//! Notifications are advisory. Delivery failures must never change
//! the outcome of an allocation, so implementations handle their own
//! errors instead of returning them.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{EventId, RegistrationId, UserId};

/// What happened to a participant, for delivery to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationIntent {
    /// A seat was reserved and payment is expected before expiry.
    RegistrationPending {
        registration_id: RegistrationId,
        user_id: UserId,
        event_id: EventId,
    },
    /// The seat is confirmed.
    SeatConfirmed {
        registration_id: RegistrationId,
        user_id: UserId,
        event_id: EventId,
    },
    /// The event was full; the user holds a waitlist position.
    JoinedWaitlist {
        user_id: UserId,
        event_id: EventId,
        position: i64,
    },
    /// A waitlist entry was promoted into a registration.
    SeatAssigned {
        registration_id: RegistrationId,
        user_id: UserId,
        event_id: EventId,
        payment_required: bool,
    },
}

/// Trait for delivering participant notifications.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, intent: NotificationIntent);
}

/// Notifier that only logs. Useful as a default in deployments that
/// wire delivery elsewhere.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationService for TracingNotifier {
    async fn notify(&self, intent: NotificationIntent) {
        tracing::info!(?intent, "participant notification");
    }
}

/// In-memory notification service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    sent: Arc<RwLock<Vec<NotificationIntent>>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all intents delivered so far, in order.
    pub fn sent(&self) -> Vec<NotificationIntent> {
        self.sent.read().unwrap().clone()
    }

    /// Returns the number of delivered intents.
    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(&self, intent: NotificationIntent) {
        self.sent.write().unwrap().push(intent);
    }
}
