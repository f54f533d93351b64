use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, RegistrationId, TicketType, UserId, WaitlistEntryId};
use domain::{EventRecord, Registration, RegistrationStatus, WaitlistEntry};
use serde::{Deserialize, Serialize};

use crate::Result;

/// How long a claimed promotion job stays invisible to other workers.
/// A worker that dies mid-pass forfeits its claim after this long and
/// the job is handed out again.
pub const PROMOTION_JOB_LEASE_SECS: i64 = 60;

/// Outcome of an atomic check-and-reserve attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// A seat was reserved and a pending registration created.
    Reserved {
        registration: Registration,
        /// False for free events; the caller confirms immediately.
        payment_required: bool,
    },
    /// The event is at capacity; the caller should enqueue instead.
    NoCapacity,
    /// The user already holds an active registration or waitlist
    /// entry for this event. Nothing was mutated.
    AlreadyActive,
    /// The event is not published or has already started.
    EventNotOpen,
    /// No such event.
    EventNotFound,
}

/// Outcome of a waitlist enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued at the given position (unique per event, FIFO order).
    Enqueued { position: i64 },
    /// The user already holds an active registration or entry.
    AlreadyActive,
}

/// Outcome of a confirm attempt. Duplicate payment-success signals
/// land on `AlreadyConfirmed` and mutate nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed(Registration),
    AlreadyConfirmed,
    /// The registration was cancelled before the signal arrived.
    AlreadyCancelled,
    NotFound,
}

/// Outcome of a cancellation attempt. Everything but `Cancelled` is a
/// descriptive no-op, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Seat freed; a promotion job was written in the same transaction.
    Cancelled { registration: Registration },
    AlreadyCancelled,
    /// The event has started; registrations can no longer be cancelled.
    EventStarted,
    /// The actor does not own this registration.
    NotOwner,
    NotFound,
}

/// Why a waitlist conversion was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entry was no longer Active (converted or cancelled meanwhile).
    EntryNotActive,
    /// The user acquired an active registration through another path;
    /// the entry is cancelled so it cannot wedge the queue.
    UserAlreadyActive,
    /// The entry's event no longer exists.
    EventNotFound,
}

/// Outcome of converting one waitlist entry into a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertOutcome {
    /// Entry marked Converted and a fresh pending registration created.
    Converted {
        registration: Registration,
        payment_required: bool,
    },
    /// Capacity was gone by the time the conversion re-checked it.
    NoCapacity,
    Skipped { reason: SkipReason },
}

/// Outcome of a payment-failure signal. The status is read in the
/// same atomic unit that decides whether to cancel, so the caller
/// never sees a state the signal did not observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentFailOutcome {
    /// Seat freed; a promotion job was written in the same transaction.
    Cancelled { registration: Registration },
    /// The registration was no longer PENDING; nothing changed.
    Unchanged { status: RegistrationStatus },
    NotFound,
}

/// A durable promotion-trigger record, written in the same
/// transaction as the seat-freeing change that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionJob {
    pub id: i64,
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
}

/// Occupancy summary for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub capacity: i32,
    pub pending: i64,
    pub confirmed: i64,
    pub waitlisted: i64,
    pub available: i64,
}

/// What a (event, user) pair currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ParticipantStatus {
    Registered { registration: Registration },
    Waitlisted { entry: WaitlistEntry },
    None,
}

/// Core trait for allocator store implementations.
///
/// Implementations must linearize the mutating operations per event:
/// for an event of capacity C, no interleaving of `try_reserve` and
/// `convert_entry` calls may ever leave more than C active
/// registrations. All coordination state is derived from row state
/// inside each operation; nothing is cached between calls.
#[async_trait]
pub trait AllocatorStore: Send + Sync {
    // -- Event records (read-mostly; owned by the external event store) --

    /// Inserts an event record. Used by fixtures and the admin surface.
    async fn insert_event(&self, event: EventRecord) -> Result<()>;

    /// Replaces an event record. When the new capacity is higher than
    /// the stored one, a promotion job is written in the same
    /// transaction so the freed headroom gets filled from the
    /// waitlist; returns true in that case.
    async fn update_event(&self, event: EventRecord, now: DateTime<Utc>) -> Result<bool>;

    /// Loads an event record.
    async fn event(&self, event_id: EventId) -> Result<Option<EventRecord>>;

    // -- Capacity ledger --

    /// Atomically checks capacity and inserts a pending registration.
    ///
    /// The active-count read and the insert happen as one unit; two
    /// concurrent calls for the last seat cannot both succeed.
    async fn try_reserve(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Result<ReservationOutcome>;

    /// Derived count of pending + confirmed registrations.
    async fn active_count(&self, event_id: EventId) -> Result<i64>;

    // -- Waitlist queue --

    /// Appends to the waitlist, assigning `max(position) + 1`
    /// atomically with the insert so ties are impossible.
    async fn enqueue_waitlist(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome>;

    /// Marks the user's active entry Cancelled. Positions of the
    /// remaining entries are untouched; gaps are fine.
    async fn cancel_waitlist(&self, event_id: EventId, user_id: UserId) -> Result<bool>;

    /// The `limit` lowest-position Active entries, in promotion order.
    async fn peek_waitlist(&self, event_id: EventId, limit: i64) -> Result<Vec<WaitlistEntry>>;

    /// All Active entries for an event, in position order.
    async fn waitlist_for_event(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>>;

    // -- Registration lifecycle --

    /// Loads a registration by id.
    async fn registration(&self, id: RegistrationId) -> Result<Option<Registration>>;

    /// All registrations for a user, newest first.
    async fn registrations_for_user(&self, user_id: UserId) -> Result<Vec<Registration>>;

    /// Pending → Confirmed. Idempotent: repeat signals are no-ops.
    async fn confirm_registration(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome>;

    /// Active → Cancelled on behalf of `actor`. On success a
    /// promotion job is written in the same transaction.
    async fn cancel_registration(
        &self,
        id: RegistrationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome>;

    /// Pending → Cancelled on a payment-failure signal. Cancelling
    /// writes a promotion job; anything else reports the status the
    /// signal found, unchanged.
    async fn mark_payment_failed(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> Result<PaymentFailOutcome>;

    /// Cancels every pending registration created before `cutoff`,
    /// writing one promotion job per affected event. Returns the
    /// expired registrations.
    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Registration>>;

    // -- Promotion --

    /// Converts one Active entry into a fresh pending registration,
    /// re-checking capacity inside the same atomic unit so that a
    /// double-fired promotion cannot over-allocate.
    async fn convert_entry(
        &self,
        entry_id: WaitlistEntryId,
        now: DateTime<Utc>,
    ) -> Result<ConvertOutcome>;

    /// Claims up to `limit` unprocessed promotion jobs, in creation
    /// order. A claim is a lease, not a consumption: the job stays
    /// in the outbox until [`complete_promotion_jobs`] marks it
    /// processed, and is offered again once the lease
    /// ([`PROMOTION_JOB_LEASE_SECS`]) runs out.
    ///
    /// [`complete_promotion_jobs`]: AllocatorStore::complete_promotion_jobs
    async fn claim_promotion_jobs(&self, limit: i64, now: DateTime<Utc>)
    -> Result<Vec<PromotionJob>>;

    /// Marks claimed jobs processed once their promotion pass has run
    /// to completion. Never called for a pass that failed; those jobs
    /// ride out their lease and get claimed again.
    async fn complete_promotion_jobs(&self, ids: &[i64], now: DateTime<Utc>) -> Result<()>;

    // -- Read side --

    /// Occupancy summary, or None if the event does not exist.
    async fn event_stats(&self, event_id: EventId) -> Result<Option<EventStats>>;

    /// What the user currently holds for the event.
    async fn participant_status(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<ParticipantStatus>;
}
