//! In-memory store implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, RegistrationId, TicketType, UserId, WaitlistEntryId};
use domain::{EventRecord, Registration, RegistrationStatus, WaitlistEntry, WaitlistStatus};
use tokio::sync::Mutex;

use crate::store::{
    AllocatorStore, CancelOutcome, ConfirmOutcome, ConvertOutcome, EnqueueOutcome, EventStats,
    PROMOTION_JOB_LEASE_SECS, ParticipantStatus, PaymentFailOutcome, PromotionJob,
    ReservationOutcome, SkipReason,
};
use crate::{Result, StoreError};

struct JobRow {
    job: PromotionJob,
    claimed_at: Option<DateTime<Utc>>,
    processed: bool,
}

impl JobRow {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        !self.processed
            && match self.claimed_at {
                Some(claimed_at) => {
                    now - claimed_at > chrono::Duration::seconds(PROMOTION_JOB_LEASE_SECS)
                }
                None => true,
            }
    }
}

#[derive(Default)]
struct MemoryState {
    events: HashMap<EventId, EventRecord>,
    registrations: HashMap<RegistrationId, Registration>,
    waitlist: HashMap<WaitlistEntryId, WaitlistEntry>,
    jobs: Vec<JobRow>,
    next_job_id: i64,
}

impl MemoryState {
    fn active_count(&self, event_id: EventId) -> i64 {
        self.registrations
            .values()
            .filter(|r| r.event_id == event_id && r.is_active())
            .count() as i64
    }

    fn has_active_registration(&self, event_id: EventId, user_id: UserId) -> bool {
        self.registrations
            .values()
            .any(|r| r.event_id == event_id && r.user_id == user_id && r.is_active())
    }

    fn has_active_entry(&self, event_id: EventId, user_id: UserId) -> bool {
        self.waitlist
            .values()
            .any(|e| e.event_id == event_id && e.user_id == user_id && e.is_active())
    }

    fn active_entries_ordered(&self, event_id: EventId) -> Vec<WaitlistEntry> {
        let mut entries: Vec<_> = self
            .waitlist
            .values()
            .filter(|e| e.event_id == event_id && e.is_active())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        entries
    }

    fn push_job(&mut self, event_id: EventId, now: DateTime<Utc>) {
        self.next_job_id += 1;
        self.jobs.push(JobRow {
            job: PromotionJob {
                id: self.next_job_id,
                event_id,
                created_at: now,
            },
            claimed_at: None,
            processed: false,
        });
    }

    fn check_capacity(&self, event: &EventRecord) -> Result<i64> {
        let active = self.active_count(event.id);
        if active > event.capacity as i64 {
            return Err(StoreError::InvariantViolation {
                event_id: event.id,
                active,
                capacity: event.capacity,
            });
        }
        Ok(active)
    }
}

/// In-memory allocator store.
///
/// A single async mutex over all state makes every operation trivially
/// atomic, giving the same linearization guarantees the Postgres
/// implementation gets from per-event advisory locks.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of promotion jobs not yet claimed. Test support.
    pub async fn unclaimed_job_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .filter(|j| !j.processed && j.claimed_at.is_none())
            .count()
    }

    /// Writes a promotion job outside any seat-freeing change. Test
    /// support.
    pub async fn push_promotion_job(&self, event_id: EventId, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.push_job(event_id, now);
    }

    /// Total registrations ever created for an event. Test support.
    pub async fn registration_count(&self, event_id: EventId) -> usize {
        let state = self.state.lock().await;
        state
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .count()
    }
}

#[async_trait]
impl AllocatorStore for InMemoryStore {
    async fn insert_event(&self, event: EventRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.events.insert(event.id, event);
        Ok(())
    }

    async fn update_event(&self, event: EventRecord, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let capacity_raised = state
            .events
            .get(&event.id)
            .is_some_and(|old| event.capacity > old.capacity);
        let event_id = event.id;
        state.events.insert(event.id, event);
        if capacity_raised {
            state.push_job(event_id, now);
        }
        Ok(capacity_raised)
    }

    async fn event(&self, event_id: EventId) -> Result<Option<EventRecord>> {
        let state = self.state.lock().await;
        Ok(state.events.get(&event_id).cloned())
    }

    async fn try_reserve(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Result<ReservationOutcome> {
        let mut state = self.state.lock().await;

        let Some(event) = state.events.get(&event_id).cloned() else {
            return Ok(ReservationOutcome::EventNotFound);
        };
        if !event.is_open(now) {
            return Ok(ReservationOutcome::EventNotOpen);
        }
        if state.has_active_registration(event_id, user_id)
            || state.has_active_entry(event_id, user_id)
        {
            return Ok(ReservationOutcome::AlreadyActive);
        }

        let active = state.check_capacity(&event)?;
        if active >= event.capacity as i64 {
            return Ok(ReservationOutcome::NoCapacity);
        }

        let registration = Registration::pending(event_id, user_id, ticket_type, now);
        state
            .registrations
            .insert(registration.id, registration.clone());

        Ok(ReservationOutcome::Reserved {
            registration,
            payment_required: event.requires_payment(),
        })
    }

    async fn active_count(&self, event_id: EventId) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.active_count(event_id))
    }

    async fn enqueue_waitlist(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock().await;

        if state.has_active_registration(event_id, user_id)
            || state.has_active_entry(event_id, user_id)
        {
            return Ok(EnqueueOutcome::AlreadyActive);
        }

        // Max over all entries, not just active ones, so a cancelled
        // entry's position is never reused.
        let position = state
            .waitlist
            .values()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.position)
            .max()
            .unwrap_or(0)
            + 1;

        let entry = WaitlistEntry::active(event_id, user_id, position, ticket_type, now);
        state.waitlist.insert(entry.id, entry);

        Ok(EnqueueOutcome::Enqueued { position })
    }

    async fn cancel_waitlist(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let entry = state
            .waitlist
            .values_mut()
            .find(|e| e.event_id == event_id && e.user_id == user_id && e.is_active());
        match entry {
            Some(entry) => {
                entry.status = WaitlistStatus::Cancelled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn peek_waitlist(&self, event_id: EventId, limit: i64) -> Result<Vec<WaitlistEntry>> {
        let state = self.state.lock().await;
        let mut entries = state.active_entries_ordered(event_id);
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn waitlist_for_event(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        let state = self.state.lock().await;
        Ok(state.active_entries_ordered(event_id))
    }

    async fn registration(&self, id: RegistrationId) -> Result<Option<Registration>> {
        let state = self.state.lock().await;
        Ok(state.registrations.get(&id).cloned())
    }

    async fn registrations_for_user(&self, user_id: UserId) -> Result<Vec<Registration>> {
        let state = self.state.lock().await;
        let mut regs: Vec<_> = state
            .registrations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        regs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(regs)
    }

    async fn confirm_registration(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        let mut state = self.state.lock().await;
        let Some(reg) = state.registrations.get_mut(&id) else {
            return Ok(ConfirmOutcome::NotFound);
        };
        match reg.status {
            RegistrationStatus::Pending => {
                reg.status = RegistrationStatus::Confirmed;
                reg.updated_at = now;
                Ok(ConfirmOutcome::Confirmed(reg.clone()))
            }
            RegistrationStatus::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed),
            RegistrationStatus::Cancelled => Ok(ConfirmOutcome::AlreadyCancelled),
        }
    }

    async fn cancel_registration(
        &self,
        id: RegistrationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let mut state = self.state.lock().await;
        let Some(reg) = state.registrations.get(&id).cloned() else {
            return Ok(CancelOutcome::NotFound);
        };
        if reg.user_id != actor {
            return Ok(CancelOutcome::NotOwner);
        }
        if reg.status == RegistrationStatus::Cancelled {
            return Ok(CancelOutcome::AlreadyCancelled);
        }
        if let Some(event) = state.events.get(&reg.event_id)
            && now >= event.starts_at
        {
            return Ok(CancelOutcome::EventStarted);
        }

        let event_id = reg.event_id;
        let registration = match state.registrations.get_mut(&id) {
            Some(reg) => {
                reg.status = RegistrationStatus::Cancelled;
                reg.updated_at = now;
                reg.clone()
            }
            None => return Ok(CancelOutcome::NotFound),
        };
        state.push_job(event_id, now);

        Ok(CancelOutcome::Cancelled { registration })
    }

    async fn mark_payment_failed(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> Result<PaymentFailOutcome> {
        let mut state = self.state.lock().await;
        let Some(reg) = state.registrations.get_mut(&id) else {
            return Ok(PaymentFailOutcome::NotFound);
        };
        if reg.status != RegistrationStatus::Pending {
            return Ok(PaymentFailOutcome::Unchanged { status: reg.status });
        }
        reg.status = RegistrationStatus::Cancelled;
        reg.updated_at = now;
        let registration = reg.clone();
        state.push_job(registration.event_id, now);
        Ok(PaymentFailOutcome::Cancelled { registration })
    }

    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Registration>> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        let mut touched_events = Vec::new();

        for reg in state.registrations.values_mut() {
            if reg.status == RegistrationStatus::Pending && reg.created_at < cutoff {
                reg.status = RegistrationStatus::Cancelled;
                reg.updated_at = now;
                if !touched_events.contains(&reg.event_id) {
                    touched_events.push(reg.event_id);
                }
                expired.push(reg.clone());
            }
        }
        for event_id in touched_events {
            state.push_job(event_id, now);
        }

        Ok(expired)
    }

    async fn convert_entry(
        &self,
        entry_id: WaitlistEntryId,
        now: DateTime<Utc>,
    ) -> Result<ConvertOutcome> {
        let mut state = self.state.lock().await;

        let Some(entry) = state.waitlist.get(&entry_id).cloned() else {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EntryNotActive,
            });
        };
        if !entry.is_active() {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EntryNotActive,
            });
        }
        let Some(event) = state.events.get(&entry.event_id).cloned() else {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EventNotFound,
            });
        };

        let active = state.check_capacity(&event)?;
        if active >= event.capacity as i64 {
            return Ok(ConvertOutcome::NoCapacity);
        }

        if state.has_active_registration(entry.event_id, entry.user_id) {
            if let Some(stored) = state.waitlist.get_mut(&entry_id) {
                stored.status = WaitlistStatus::Cancelled;
            }
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::UserAlreadyActive,
            });
        }

        let registration =
            Registration::pending(entry.event_id, entry.user_id, entry.ticket_type, now);
        state
            .registrations
            .insert(registration.id, registration.clone());
        if let Some(stored) = state.waitlist.get_mut(&entry_id) {
            stored.status = WaitlistStatus::Converted;
            stored.converted_at = Some(now);
        }

        Ok(ConvertOutcome::Converted {
            registration,
            payment_required: event.requires_payment(),
        })
    }

    async fn claim_promotion_jobs(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PromotionJob>> {
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        for row in state.jobs.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if row.claimable(now) {
                row.claimed_at = Some(now);
                claimed.push(row.job.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete_promotion_jobs(&self, ids: &[i64], _now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        for row in state.jobs.iter_mut() {
            if ids.contains(&row.job.id) {
                row.processed = true;
            }
        }
        Ok(())
    }

    async fn event_stats(&self, event_id: EventId) -> Result<Option<EventStats>> {
        let state = self.state.lock().await;
        let Some(event) = state.events.get(&event_id) else {
            return Ok(None);
        };
        let pending = state
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status == RegistrationStatus::Pending)
            .count() as i64;
        let confirmed = state
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status == RegistrationStatus::Confirmed)
            .count() as i64;
        let waitlisted = state
            .waitlist
            .values()
            .filter(|e| e.event_id == event_id && e.is_active())
            .count() as i64;

        Ok(Some(EventStats {
            capacity: event.capacity,
            pending,
            confirmed,
            waitlisted,
            available: (event.capacity as i64 - pending - confirmed).max(0),
        }))
    }

    async fn participant_status(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<ParticipantStatus> {
        let state = self.state.lock().await;
        if let Some(reg) = state
            .registrations
            .values()
            .find(|r| r.event_id == event_id && r.user_id == user_id && r.is_active())
        {
            return Ok(ParticipantStatus::Registered {
                registration: reg.clone(),
            });
        }
        if let Some(entry) = state
            .waitlist
            .values()
            .find(|e| e.event_id == event_id && e.user_id == user_id && e.is_active())
        {
            return Ok(ParticipantStatus::Waitlisted {
                entry: entry.clone(),
            });
        }
        Ok(ParticipantStatus::None)
    }
}
