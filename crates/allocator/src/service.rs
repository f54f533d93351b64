//! Allocation orchestration over the store.
//!
//! The store enforces the hard invariants (capacity, one active spot
//! per user, durable promotion jobs). This layer sequences the calls,
//! retries transient failures, emits notifications and metrics, and
//! nudges the promotion worker when a seat frees up.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{EventId, RegistrationId, TicketType, UserId};
use domain::{EventRecord, Registration, WaitlistEntry};
use store::{
    AllocatorStore, CancelOutcome, ConfirmOutcome, ConvertOutcome, EnqueueOutcome, EventStats,
    ParticipantStatus, PaymentFailOutcome, ReservationOutcome, SkipReason,
};
use tokio::sync::Notify;

use crate::error::AllocatorError;
use crate::notify::{NotificationIntent, NotificationService};
use crate::retry::RetryPolicy;

/// Tuning knobs for the allocator.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// How long a PENDING registration may sit unpaid before the
    /// sweeper cancels it.
    pub pending_ttl_secs: u64,
    /// Retry budget for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 1800,
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened when a user asked for a seat.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    /// Seat reserved; payment is expected before the pending TTL.
    Registered { registration: Registration },
    /// Seat reserved and confirmed immediately (free event).
    Confirmed { registration: Registration },
    /// Event full; the user holds this waitlist position.
    Waitlisted { position: i64 },
    /// The user already holds a registration or waitlist spot.
    AlreadyActive,
    /// The event is not accepting registrations.
    EventNotOpen,
    /// No such event.
    EventNotFound,
}

/// Summary of one promotion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromotionReport {
    pub jobs_processed: usize,
    pub converted: usize,
    pub skipped: usize,
}

/// The allocator service.
pub struct Allocator<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: AllocatorConfig,
    promotions: Arc<Notify>,
}

impl<S, N> Allocator<S, N>
where
    S: AllocatorStore,
    N: NotificationService,
{
    /// Creates a new allocator over the given store and notifier.
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: AllocatorConfig) -> Self {
        Self {
            store,
            notifier,
            config,
            promotions: Arc::new(Notify::new()),
        }
    }

    /// Gets a reference to the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Handle the promotion worker waits on. Signalled whenever an
    /// operation may have freed a seat.
    pub fn promotion_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.promotions)
    }

    /// Creates a new event.
    pub async fn create_event(&self, event: EventRecord) -> Result<(), AllocatorError> {
        self.store.insert_event(event).await?;
        Ok(())
    }

    /// Replaces an event's details. Raising the capacity frees
    /// headroom, so the store writes a promotion job and the worker
    /// gets nudged, exactly as for a cancellation.
    pub async fn update_event(&self, event: EventRecord) -> Result<(), AllocatorError> {
        let capacity_raised = self.store.update_event(event, Utc::now()).await?;
        if capacity_raised {
            self.promotions.notify_one();
        }
        Ok(())
    }

    /// Looks up an event.
    pub async fn event(&self, event_id: EventId) -> Result<Option<EventRecord>, AllocatorError> {
        Ok(self.store.event(event_id).await?)
    }

    /// Asks for a seat. Falls back to the waitlist when the event is
    /// full, and confirms immediately when the event is free.
    #[tracing::instrument(skip(self), fields(%event_id, %user_id))]
    pub async fn register(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
    ) -> Result<RegisterOutcome, AllocatorError> {
        let now = Utc::now();
        let reserved = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.try_reserve(event_id, user_id, ticket_type, now).await }
            })
            .await?;

        match reserved {
            ReservationOutcome::Reserved {
                registration,
                payment_required,
            } => {
                metrics::counter!("allocator_registrations_total", "outcome" => "reserved")
                    .increment(1);
                if payment_required {
                    self.notifier
                        .notify(NotificationIntent::RegistrationPending {
                            registration_id: registration.id,
                            user_id,
                            event_id,
                        })
                        .await;
                    Ok(RegisterOutcome::Registered { registration })
                } else {
                    // Free events skip the payment leg entirely.
                    let confirmed = self.payment_succeeded(registration.id).await?;
                    match confirmed {
                        ConfirmOutcome::Confirmed(registration) => {
                            Ok(RegisterOutcome::Confirmed { registration })
                        }
                        // The sweeper cannot have raced us within the
                        // TTL, but a concurrent confirm is harmless.
                        _ => Ok(RegisterOutcome::Registered { registration }),
                    }
                }
            }
            ReservationOutcome::NoCapacity => {
                let enqueued = self
                    .config
                    .retry
                    .run(|| {
                        let store = Arc::clone(&self.store);
                        async move {
                            store
                                .enqueue_waitlist(event_id, user_id, ticket_type, now)
                                .await
                        }
                    })
                    .await?;
                match enqueued {
                    EnqueueOutcome::Enqueued { position } => {
                        metrics::counter!("allocator_registrations_total", "outcome" => "waitlisted")
                            .increment(1);
                        self.notifier
                            .notify(NotificationIntent::JoinedWaitlist {
                                user_id,
                                event_id,
                                position,
                            })
                            .await;
                        Ok(RegisterOutcome::Waitlisted { position })
                    }
                    EnqueueOutcome::AlreadyActive => Ok(RegisterOutcome::AlreadyActive),
                }
            }
            ReservationOutcome::AlreadyActive => {
                metrics::counter!("allocator_registrations_total", "outcome" => "duplicate")
                    .increment(1);
                Ok(RegisterOutcome::AlreadyActive)
            }
            ReservationOutcome::EventNotOpen => Ok(RegisterOutcome::EventNotOpen),
            ReservationOutcome::EventNotFound => Ok(RegisterOutcome::EventNotFound),
        }
    }

    /// Cancels a registration on behalf of its owner.
    #[tracing::instrument(skip(self), fields(%registration_id, %actor))]
    pub async fn cancel(
        &self,
        registration_id: RegistrationId,
        actor: UserId,
    ) -> Result<CancelOutcome, AllocatorError> {
        let now = Utc::now();
        let outcome = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.cancel_registration(registration_id, actor, now).await }
            })
            .await?;

        if matches!(outcome, CancelOutcome::Cancelled { .. }) {
            metrics::counter!("allocator_cancellations_total").increment(1);
            self.promotions.notify_one();
        }
        Ok(outcome)
    }

    /// Removes the user's active waitlist entry. Returns false when
    /// there was none.
    #[tracing::instrument(skip(self), fields(%event_id, %user_id))]
    pub async fn leave_waitlist(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, AllocatorError> {
        let removed = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.cancel_waitlist(event_id, user_id).await }
            })
            .await?;
        if removed {
            metrics::counter!("allocator_waitlist_departures_total").increment(1);
        }
        Ok(removed)
    }

    /// Confirms a PENDING registration after a successful payment.
    /// Repeated and late signals are absorbed without effect.
    #[tracing::instrument(skip(self), fields(%registration_id))]
    pub async fn payment_succeeded(
        &self,
        registration_id: RegistrationId,
    ) -> Result<ConfirmOutcome, AllocatorError> {
        let now = Utc::now();
        let outcome = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.confirm_registration(registration_id, now).await }
            })
            .await?;

        match &outcome {
            ConfirmOutcome::Confirmed(registration) => {
                metrics::counter!("allocator_confirmations_total").increment(1);
                self.notifier
                    .notify(NotificationIntent::SeatConfirmed {
                        registration_id: registration.id,
                        user_id: registration.user_id,
                        event_id: registration.event_id,
                    })
                    .await;
            }
            ConfirmOutcome::AlreadyCancelled => {
                // The seat was already released; a refund, if any, is
                // the payment provider's concern.
                tracing::warn!(%registration_id, "payment success for a cancelled registration");
            }
            ConfirmOutcome::AlreadyConfirmed | ConfirmOutcome::NotFound => {}
        }
        Ok(outcome)
    }

    /// Cancels a PENDING registration after a failed payment. A
    /// signal for an already-terminal registration is a no-op.
    #[tracing::instrument(skip(self), fields(%registration_id))]
    pub async fn payment_failed(
        &self,
        registration_id: RegistrationId,
    ) -> Result<PaymentFailOutcome, AllocatorError> {
        let now = Utc::now();
        let outcome = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.mark_payment_failed(registration_id, now).await }
            })
            .await?;
        if matches!(outcome, PaymentFailOutcome::Cancelled { .. }) {
            metrics::counter!("allocator_payment_failures_total").increment(1);
            self.promotions.notify_one();
        }
        Ok(outcome)
    }

    /// Looks up a registration by id.
    pub async fn registration(
        &self,
        id: RegistrationId,
    ) -> Result<Option<Registration>, AllocatorError> {
        Ok(self.store.registration(id).await?)
    }

    /// All registrations a user has made, newest first.
    pub async fn registrations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Registration>, AllocatorError> {
        Ok(self.store.registrations_for_user(user_id).await?)
    }

    /// Where the user stands for an event.
    pub async fn status(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<ParticipantStatus, AllocatorError> {
        Ok(self.store.participant_status(event_id, user_id).await?)
    }

    /// Occupancy counts for an event.
    pub async fn stats(&self, event_id: EventId) -> Result<Option<EventStats>, AllocatorError> {
        Ok(self.store.event_stats(event_id).await?)
    }

    /// The active waitlist for an event, in promotion order.
    pub async fn waitlist(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>, AllocatorError> {
        Ok(self.store.waitlist_for_event(event_id).await?)
    }

    /// Cancels PENDING registrations older than the pending TTL.
    /// Returns how many were expired. Freed seats are promoted by the
    /// worker via the jobs the store wrote.
    #[tracing::instrument(skip(self))]
    pub async fn expire_due(&self) -> Result<usize, AllocatorError> {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(self.config.pending_ttl_secs as i64);
        let expired = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.expire_pending(cutoff, now).await }
            })
            .await?;

        if !expired.is_empty() {
            metrics::counter!("allocator_expirations_total").increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "expired unpaid registrations");
            self.promotions.notify_one();
        }
        Ok(expired.len())
    }

    /// Claims pending promotion jobs and fills freed seats from the
    /// head of each event's waitlist. Safe to call from concurrent
    /// triggers: the store leases each job to one caller at a time
    /// and re-checks capacity per conversion.
    ///
    /// Jobs are only marked processed after their event's pass runs
    /// to completion. A failed pass leaves its jobs leased, and the
    /// lease expiry hands them to a later pass, so a crashed or
    /// erroring worker cannot lose a promotion. A repeated pass is
    /// harmless: the capacity re-check converts nothing extra.
    #[tracing::instrument(skip(self))]
    pub async fn run_promotions(&self, max_jobs: i64) -> Result<PromotionReport, AllocatorError> {
        let now = Utc::now();
        let jobs = self
            .config
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                async move { store.claim_promotion_jobs(max_jobs, now).await }
            })
            .await?;

        // Several jobs for one event collapse into a single pass; the
        // pass drains every seat that is actually free.
        let mut per_event: Vec<(EventId, Vec<i64>)> = Vec::new();
        for job in jobs {
            match per_event.iter_mut().find(|(id, _)| *id == job.event_id) {
                Some((_, ids)) => ids.push(job.id),
                None => per_event.push((job.event_id, vec![job.id])),
            }
        }

        let mut report = PromotionReport::default();
        for (event_id, job_ids) in per_event {
            report.jobs_processed += job_ids.len();
            if let Err(error) = self.promote_event(event_id, &mut report).await {
                tracing::error!(%event_id, %error, "promotion pass failed; jobs stay leased");
                continue;
            }
            let completed = self
                .config
                .retry
                .run(|| {
                    let store = Arc::clone(&self.store);
                    let job_ids = job_ids.clone();
                    async move { store.complete_promotion_jobs(&job_ids, now).await }
                })
                .await;
            if let Err(error) = completed {
                // The pass itself succeeded; the re-offered jobs will
                // find nothing left to convert.
                tracing::error!(%event_id, %error, "failed to mark promotion jobs processed");
            }
        }
        Ok(report)
    }

    async fn promote_event(
        &self,
        event_id: EventId,
        report: &mut PromotionReport,
    ) -> Result<(), AllocatorError> {
        loop {
            let head = self
                .config
                .retry
                .run(|| {
                    let store = Arc::clone(&self.store);
                    async move { store.peek_waitlist(event_id, 1).await }
                })
                .await?;
            let Some(entry) = head.into_iter().next() else {
                return Ok(());
            };

            let now = Utc::now();
            let entry_id = entry.id;
            let outcome = self
                .config
                .retry
                .run(|| {
                    let store = Arc::clone(&self.store);
                    async move { store.convert_entry(entry_id, now).await }
                })
                .await?;

            match outcome {
                ConvertOutcome::Converted {
                    registration,
                    payment_required,
                } => {
                    report.converted += 1;
                    metrics::counter!("allocator_promotions_total").increment(1);
                    tracing::info!(%event_id, user_id = %registration.user_id,
                        position = entry.position, "promoted waitlist entry");
                    self.notifier
                        .notify(NotificationIntent::SeatAssigned {
                            registration_id: registration.id,
                            user_id: registration.user_id,
                            event_id,
                            payment_required,
                        })
                        .await;
                    if !payment_required {
                        // Free events skip the payment leg, same as a
                        // fresh registration.
                        self.payment_succeeded(registration.id).await?;
                    }
                }
                ConvertOutcome::NoCapacity => return Ok(()),
                ConvertOutcome::Skipped { reason } => {
                    report.skipped += 1;
                    tracing::debug!(%event_id, ?reason, "skipped waitlist entry");
                    // Every entry of a vanished event would skip the
                    // same way; re-peeking would spin on the head.
                    if reason == SkipReason::EventNotFound {
                        return Ok(());
                    }
                }
            }
        }
    }
}
