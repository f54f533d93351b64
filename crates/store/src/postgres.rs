//! PostgreSQL-backed allocator store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, RegistrationId, TicketType, UserId, WaitlistEntryId};
use domain::{EventRecord, Registration, RegistrationStatus, WaitlistEntry, WaitlistStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::store::{
    AllocatorStore, CancelOutcome, ConfirmOutcome, ConvertOutcome, EnqueueOutcome, EventStats,
    PROMOTION_JOB_LEASE_SECS, ParticipantStatus, PaymentFailOutcome, PromotionJob,
    ReservationOutcome, SkipReason,
};
use crate::{Result, StoreError};

/// PostgreSQL-backed allocator store.
///
/// Operations that depend on the active count take a
/// transaction-scoped advisory lock keyed on the event id, which
/// linearizes reservation, enqueue and conversion per event. A LOCAL
/// statement timeout turns stuck waits into retryable `Timeout`
/// errors. The active count is always derived by `COUNT(*)` inside
/// the locking transaction; there is no counter column to drift.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        sqlx::query("SET LOCAL statement_timeout = '5s'")
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        Ok(tx)
    }
}

/// Classifies database errors so callers can tell retryable races
/// from real failures.
fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && let Some(code) = db.code()
    {
        match code.as_ref() {
            // serialization_failure, deadlock_detected
            "40001" | "40P01" => return StoreError::Conflict(db.message().to_string()),
            // lock_not_available, query_canceled (statement_timeout)
            "55P03" | "57014" => return StoreError::Timeout(db.message().to_string()),
            _ => {}
        }
    }
    StoreError::Database(e)
}

/// Serializes all capacity-sensitive work for one event.
async fn lock_event(tx: &mut Transaction<'static, Postgres>, event_id: EventId) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(event_id.as_uuid().to_string())
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

fn row_to_event(row: &PgRow) -> Result<EventRecord> {
    let status: String = row.try_get("status")?;
    Ok(EventRecord {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        capacity: row.try_get("capacity")?,
        status: status.parse()?,
        starts_at: row.try_get("starts_at")?,
        price_cents: row.try_get("price_cents")?,
    })
}

fn row_to_registration(row: &PgRow) -> Result<Registration> {
    let status: String = row.try_get("status")?;
    let ticket: String = row.try_get("ticket_type")?;
    Ok(Registration {
        id: RegistrationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        ticket_type: ticket.parse().map_err(StoreError::Corrupt)?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<WaitlistEntry> {
    let status: String = row.try_get("status")?;
    let ticket: String = row.try_get("ticket_type")?;
    Ok(WaitlistEntry {
        id: WaitlistEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        position: row.try_get("position")?,
        status: status.parse()?,
        ticket_type: ticket.parse().map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at")?,
        converted_at: row.try_get("converted_at")?,
    })
}

const REGISTRATION_COLS: &str =
    "id, event_id, user_id, ticket_type, status, created_at, updated_at";
const ENTRY_COLS: &str =
    "id, event_id, user_id, position, status, ticket_type, created_at, converted_at";

async fn fetch_event_tx(
    tx: &mut Transaction<'static, Postgres>,
    event_id: EventId,
) -> Result<Option<EventRecord>> {
    let row = sqlx::query("SELECT id, capacity, status, starts_at, price_cents FROM events WHERE id = $1")
        .bind(event_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_err)?;
    row.as_ref().map(row_to_event).transpose()
}

async fn user_is_active_tx(
    tx: &mut Transaction<'static, Postgres>,
    event_id: EventId,
    user_id: UserId,
) -> Result<bool> {
    let registered: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM registrations
         WHERE event_id = $1 AND user_id = $2 AND status IN ('PENDING', 'CONFIRMED'))",
    )
    .bind(event_id.as_uuid())
    .bind(user_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_err)?;
    if registered {
        return Ok(true);
    }
    let waitlisted: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM waitlist_entries
         WHERE event_id = $1 AND user_id = $2 AND status = 'ACTIVE')",
    )
    .bind(event_id.as_uuid())
    .bind(user_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(waitlisted)
}

async fn active_count_tx(
    tx: &mut Transaction<'static, Postgres>,
    event_id: EventId,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM registrations
         WHERE event_id = $1 AND status IN ('PENDING', 'CONFIRMED')",
    )
    .bind(event_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(count)
}

/// Reads the active count and fails loudly if it already exceeds
/// capacity, which would mean the serialization strategy is broken.
async fn checked_active_count_tx(
    tx: &mut Transaction<'static, Postgres>,
    event: &EventRecord,
) -> Result<i64> {
    let active = active_count_tx(tx, event.id).await?;
    if active > event.capacity as i64 {
        return Err(StoreError::InvariantViolation {
            event_id: event.id,
            active,
            capacity: event.capacity,
        });
    }
    Ok(active)
}

async fn insert_registration_tx(
    tx: &mut Transaction<'static, Postgres>,
    registration: &Registration,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO registrations (id, event_id, user_id, ticket_type, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(registration.id.as_uuid())
    .bind(registration.event_id.as_uuid())
    .bind(registration.user_id.as_uuid())
    .bind(registration.ticket_type.as_str())
    .bind(registration.status.as_str())
    .bind(registration.created_at)
    .bind(registration.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

async fn insert_promotion_job_tx(
    tx: &mut Transaction<'static, Postgres>,
    event_id: EventId,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO promotion_jobs (event_id, created_at) VALUES ($1, $2)")
        .bind(event_id.as_uuid())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

#[async_trait]
impl AllocatorStore for PostgresStore {
    async fn insert_event(&self, event: EventRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, capacity, status, starts_at, price_cents)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id.as_uuid())
        .bind(event.capacity)
        .bind(event.status.as_str())
        .bind(event.starts_at)
        .bind(event.price_cents)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_event(&self, event: EventRecord, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.begin().await?;

        let old_capacity: Option<i32> =
            sqlx::query_scalar("SELECT capacity FROM events WHERE id = $1 FOR UPDATE")
                .bind(event.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?;
        let Some(old_capacity) = old_capacity else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE events SET capacity = $2, status = $3, starts_at = $4, price_cents = $5
             WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(event.capacity)
        .bind(event.status.as_str())
        .bind(event.starts_at)
        .bind(event.price_cents)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let capacity_raised = event.capacity > old_capacity;
        if capacity_raised {
            insert_promotion_job_tx(&mut tx, event.id, now).await?;
        }
        tx.commit().await.map_err(map_db_err)?;
        Ok(capacity_raised)
    }

    async fn event(&self, event_id: EventId) -> Result<Option<EventRecord>> {
        let row = sqlx::query(
            "SELECT id, capacity, status, starts_at, price_cents FROM events WHERE id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn try_reserve(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Result<ReservationOutcome> {
        let mut tx = self.begin().await?;
        lock_event(&mut tx, event_id).await?;

        let Some(event) = fetch_event_tx(&mut tx, event_id).await? else {
            return Ok(ReservationOutcome::EventNotFound);
        };
        if !event.is_open(now) {
            return Ok(ReservationOutcome::EventNotOpen);
        }
        if user_is_active_tx(&mut tx, event_id, user_id).await? {
            return Ok(ReservationOutcome::AlreadyActive);
        }

        let active = checked_active_count_tx(&mut tx, &event).await?;
        if active >= event.capacity as i64 {
            return Ok(ReservationOutcome::NoCapacity);
        }

        let registration = Registration::pending(event_id, user_id, ticket_type, now);
        insert_registration_tx(&mut tx, &registration).await?;
        tx.commit().await.map_err(map_db_err)?;

        Ok(ReservationOutcome::Reserved {
            registration,
            payment_required: event.requires_payment(),
        })
    }

    async fn active_count(&self, event_id: EventId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations
             WHERE event_id = $1 AND status IN ('PENDING', 'CONFIRMED')",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(count)
    }

    async fn enqueue_waitlist(
        &self,
        event_id: EventId,
        user_id: UserId,
        ticket_type: TicketType,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let mut tx = self.begin().await?;
        lock_event(&mut tx, event_id).await?;

        if user_is_active_tx(&mut tx, event_id, user_id).await? {
            return Ok(EnqueueOutcome::AlreadyActive);
        }

        // Max over all entries, not just active ones, so a cancelled
        // entry's position is never reused.
        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM waitlist_entries WHERE event_id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let entry = WaitlistEntry::active(event_id, user_id, position, ticket_type, now);
        sqlx::query(
            "INSERT INTO waitlist_entries (id, event_id, user_id, position, status, ticket_type, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.event_id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.position)
        .bind(entry.status.as_str())
        .bind(entry.ticket_type.as_str())
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;

        Ok(EnqueueOutcome::Enqueued { position })
    }

    async fn cancel_waitlist(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE waitlist_entries SET status = 'CANCELLED'
             WHERE event_id = $1 AND user_id = $2 AND status = 'ACTIVE'",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn peek_waitlist(&self, event_id: EventId, limit: i64) -> Result<Vec<WaitlistEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLS} FROM waitlist_entries
             WHERE event_id = $1 AND status = 'ACTIVE'
             ORDER BY position ASC
             LIMIT $2"
        ))
        .bind(event_id.as_uuid())
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn waitlist_for_event(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLS} FROM waitlist_entries
             WHERE event_id = $1 AND status = 'ACTIVE'
             ORDER BY position ASC"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn registration(&self, id: RegistrationId) -> Result<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_registration).transpose()
    }

    async fn registrations_for_user(&self, user_id: UserId) -> Result<Vec<Registration>> {
        let rows = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations
             WHERE user_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_registration).collect()
    }

    async fn confirm_registration(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let Some(registration) = row.as_ref().map(row_to_registration).transpose()? else {
            return Ok(ConfirmOutcome::NotFound);
        };

        match registration.status {
            RegistrationStatus::Pending => {
                sqlx::query(
                    "UPDATE registrations SET status = 'CONFIRMED', updated_at = $2 WHERE id = $1",
                )
                .bind(id.as_uuid())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
                tx.commit().await.map_err(map_db_err)?;
                Ok(ConfirmOutcome::Confirmed(Registration {
                    status: RegistrationStatus::Confirmed,
                    updated_at: now,
                    ..registration
                }))
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
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let Some(registration) = row.as_ref().map(row_to_registration).transpose()? else {
            return Ok(CancelOutcome::NotFound);
        };

        if registration.user_id != actor {
            return Ok(CancelOutcome::NotOwner);
        }
        if registration.status == RegistrationStatus::Cancelled {
            return Ok(CancelOutcome::AlreadyCancelled);
        }
        if let Some(event) = fetch_event_tx(&mut tx, registration.event_id).await?
            && now >= event.starts_at
        {
            return Ok(CancelOutcome::EventStarted);
        }

        sqlx::query("UPDATE registrations SET status = 'CANCELLED', updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        insert_promotion_job_tx(&mut tx, registration.event_id, now).await?;
        tx.commit().await.map_err(map_db_err)?;

        Ok(CancelOutcome::Cancelled {
            registration: Registration {
                status: RegistrationStatus::Cancelled,
                updated_at: now,
                ..registration
            },
        })
    }

    async fn mark_payment_failed(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> Result<PaymentFailOutcome> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let Some(registration) = row.as_ref().map(row_to_registration).transpose()? else {
            return Ok(PaymentFailOutcome::NotFound);
        };

        if registration.status != RegistrationStatus::Pending {
            return Ok(PaymentFailOutcome::Unchanged {
                status: registration.status,
            });
        }

        sqlx::query("UPDATE registrations SET status = 'CANCELLED', updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        insert_promotion_job_tx(&mut tx, registration.event_id, now).await?;
        tx.commit().await.map_err(map_db_err)?;

        Ok(PaymentFailOutcome::Cancelled {
            registration: Registration {
                status: RegistrationStatus::Cancelled,
                updated_at: now,
                ..registration
            },
        })
    }

    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Registration>> {
        let mut tx = self.begin().await?;

        let rows = sqlx::query(&format!(
            "UPDATE registrations SET status = 'CANCELLED', updated_at = $2
             WHERE status = 'PENDING' AND created_at < $1
             RETURNING {REGISTRATION_COLS}"
        ))
        .bind(cutoff)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let expired: Vec<Registration> = rows
            .iter()
            .map(row_to_registration)
            .collect::<Result<_>>()?;

        let mut touched_events = Vec::new();
        for registration in &expired {
            if !touched_events.contains(&registration.event_id) {
                touched_events.push(registration.event_id);
            }
        }
        for event_id in touched_events {
            insert_promotion_job_tx(&mut tx, event_id, now).await?;
        }
        tx.commit().await.map_err(map_db_err)?;

        Ok(expired)
    }

    async fn convert_entry(
        &self,
        entry_id: WaitlistEntryId,
        now: DateTime<Utc>,
    ) -> Result<ConvertOutcome> {
        // Read the event id without locks first, then take the same
        // advisory lock try_reserve uses before re-reading the entry.
        let event_id: Option<Uuid> =
            sqlx::query_scalar("SELECT event_id FROM waitlist_entries WHERE id = $1")
                .bind(entry_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        let Some(event_id) = event_id.map(EventId::from_uuid) else {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EntryNotActive,
            });
        };

        let mut tx = self.begin().await?;
        lock_event(&mut tx, event_id).await?;

        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLS} FROM waitlist_entries WHERE id = $1 FOR UPDATE"
        ))
        .bind(entry_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let Some(entry) = row.as_ref().map(row_to_entry).transpose()? else {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EntryNotActive,
            });
        };
        if !entry.is_active() {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EntryNotActive,
            });
        }

        let Some(event) = fetch_event_tx(&mut tx, event_id).await? else {
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::EventNotFound,
            });
        };

        let active = checked_active_count_tx(&mut tx, &event).await?;
        if active >= event.capacity as i64 {
            return Ok(ConvertOutcome::NoCapacity);
        }

        let registered: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM registrations
             WHERE event_id = $1 AND user_id = $2 AND status IN ('PENDING', 'CONFIRMED'))",
        )
        .bind(event_id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;
        if registered {
            // The user got a seat through another path; drop the entry
            // so it cannot wedge the queue.
            sqlx::query("UPDATE waitlist_entries SET status = 'CANCELLED' WHERE id = $1")
                .bind(entry_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            return Ok(ConvertOutcome::Skipped {
                reason: SkipReason::UserAlreadyActive,
            });
        }

        let registration = Registration::pending(event_id, entry.user_id, entry.ticket_type, now);
        insert_registration_tx(&mut tx, &registration).await?;
        sqlx::query(
            "UPDATE waitlist_entries SET status = 'CONVERTED', converted_at = $2 WHERE id = $1",
        )
        .bind(entry_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;

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
        // Claiming only stamps the lease; processed_at is written by
        // complete_promotion_jobs once the pass has actually run, so a
        // worker dying mid-pass cannot strand a job.
        let rows = sqlx::query(&format!(
            "WITH next_jobs AS (
                 SELECT id FROM promotion_jobs
                 WHERE processed_at IS NULL
                   AND (claimed_at IS NULL
                        OR claimed_at < $2 - interval '{PROMOTION_JOB_LEASE_SECS} seconds')
                 ORDER BY id
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE promotion_jobs AS jobs
             SET claimed_at = $2
             FROM next_jobs
             WHERE jobs.id = next_jobs.id
             RETURNING jobs.id, jobs.event_id, jobs.created_at"
        ))
        .bind(limit.max(0))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.iter()
            .map(|row| {
                Ok(PromotionJob {
                    id: row.try_get("id")?,
                    event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn complete_promotion_jobs(&self, ids: &[i64], now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE promotion_jobs SET processed_at = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn event_stats(&self, event_id: EventId) -> Result<Option<EventStats>> {
        let Some(event) = self.event(event_id).await? else {
            return Ok(None);
        };

        let (pending, confirmed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE status = 'PENDING'),
                    COUNT(*) FILTER (WHERE status = 'CONFIRMED')
             FROM registrations WHERE event_id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;

        let waitlisted: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM waitlist_entries WHERE event_id = $1 AND status = 'ACTIVE'",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;

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
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations
             WHERE event_id = $1 AND user_id = $2 AND status IN ('PENDING', 'CONFIRMED')
             LIMIT 1"
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        if let Some(registration) = row.as_ref().map(row_to_registration).transpose()? {
            return Ok(ParticipantStatus::Registered { registration });
        }

        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLS} FROM waitlist_entries
             WHERE event_id = $1 AND user_id = $2 AND status = 'ACTIVE'
             LIMIT 1"
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        if let Some(entry) = row.as_ref().map(row_to_entry).transpose()? {
            return Ok(ParticipantStatus::Waitlisted { entry });
        }

        Ok(ParticipantStatus::None)
    }
}
