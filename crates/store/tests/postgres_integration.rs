//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{EventId, TicketType, UserId};
use domain::{EventRecord, EventStatus, RegistrationStatus};
use sqlx::PgPool;
use store::{
    AllocatorStore, CancelOutcome, ConfirmOutcome, ConvertOutcome, EnqueueOutcome,
    PROMOTION_JOB_LEASE_SECS, ParticipantStatus, PaymentFailOutcome, PostgresStore,
    ReservationOutcome, SkipReason,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_allocator_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    // Create a fresh pool for each test to avoid connection issues
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE promotion_jobs, waitlist_entries, registrations, events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn open_event(capacity: i32, price_cents: i64) -> EventRecord {
    EventRecord {
        id: EventId::new(),
        capacity,
        status: EventStatus::Published,
        starts_at: Utc::now() + Duration::days(7),
        price_cents,
    }
}

#[tokio::test]
async fn reserve_succeeds_until_capacity_is_reached() {
    let store = get_test_store().await;
    let event = open_event(2, 5_000);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    for _ in 0..2 {
        let outcome = store
            .try_reserve(event.id, UserId::new(), TicketType::Regular, now)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ReservationOutcome::Reserved {
                payment_required: true,
                ..
            }
        ));
    }

    let outcome = store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ReservationOutcome::NoCapacity));
    assert_eq!(store.active_count(event.id).await.unwrap(), 2);
}

#[tokio::test]
async fn duplicate_reserve_for_same_user_is_rejected() {
    let store = get_test_store().await;
    let event = open_event(10, 0);
    store.insert_event(event.clone()).await.unwrap();
    let user = UserId::new();
    let now = Utc::now();

    let first = store
        .try_reserve(event.id, user, TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(
        first,
        ReservationOutcome::Reserved {
            payment_required: false,
            ..
        }
    ));

    let second = store
        .try_reserve(event.id, user, TicketType::Vip, now)
        .await
        .unwrap();
    assert!(matches!(second, ReservationOutcome::AlreadyActive));
    assert_eq!(store.active_count(event.id).await.unwrap(), 1);
}

#[tokio::test]
async fn reserve_rejects_missing_and_closed_events() {
    let store = get_test_store().await;
    let now = Utc::now();

    let outcome = store
        .try_reserve(EventId::new(), UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ReservationOutcome::EventNotFound));

    let mut draft = open_event(5, 0);
    draft.status = EventStatus::Draft;
    store.insert_event(draft.clone()).await.unwrap();
    let outcome = store
        .try_reserve(draft.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ReservationOutcome::EventNotOpen));

    let mut started = open_event(5, 0);
    started.starts_at = now - Duration::hours(1);
    store.insert_event(started.clone()).await.unwrap();
    let outcome = store
        .try_reserve(started.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ReservationOutcome::EventNotOpen));
}

#[tokio::test]
async fn concurrent_reserves_never_exceed_capacity() {
    let store = Arc::new(get_test_store().await);
    let event = open_event(3, 0);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        let event_id = event.id;
        handles.push(tokio::spawn(async move {
            store
                .try_reserve(event_id, UserId::new(), TicketType::Regular, now)
                .await
                .unwrap()
        }));
    }

    let mut reserved = 0;
    let mut no_capacity = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReservationOutcome::Reserved { .. } => reserved += 1,
            ReservationOutcome::NoCapacity => no_capacity += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(reserved, 3);
    assert_eq!(no_capacity, 13);
    assert_eq!(store.active_count(event.id).await.unwrap(), 3);
}

#[tokio::test]
async fn waitlist_positions_are_fifo_and_never_reused() {
    let store = get_test_store().await;
    let event = open_event(0, 0);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
    for (i, user) in users.iter().enumerate() {
        let outcome = store
            .enqueue_waitlist(event.id, *user, TicketType::Regular, now)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EnqueueOutcome::Enqueued { position } if position == i as i64 + 1
        ));
    }

    // The head leaves; its position must not be handed out again.
    assert!(store.cancel_waitlist(event.id, users[0]).await.unwrap());
    let outcome = store
        .enqueue_waitlist(event.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Enqueued { position: 4 }));

    let positions: Vec<i64> = store
        .waitlist_for_event(event.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.position)
        .collect();
    assert_eq!(positions, vec![2, 3, 4]);
}

#[tokio::test]
async fn waitlisted_user_cannot_enqueue_or_reserve_again() {
    let store = get_test_store().await;
    let event = open_event(0, 0);
    store.insert_event(event.clone()).await.unwrap();
    let user = UserId::new();
    let now = Utc::now();

    store
        .enqueue_waitlist(event.id, user, TicketType::Regular, now)
        .await
        .unwrap();

    let again = store
        .enqueue_waitlist(event.id, user, TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(again, EnqueueOutcome::AlreadyActive));

    let reserve = store
        .try_reserve(event.id, user, TicketType::Regular, now)
        .await
        .unwrap();
    assert!(matches!(reserve, ReservationOutcome::AlreadyActive));
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let store = get_test_store().await;
    let event = open_event(5, 5_000);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    let ReservationOutcome::Reserved { registration, .. } = store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };

    let first = store.confirm_registration(registration.id, now).await.unwrap();
    assert!(matches!(first, ConfirmOutcome::Confirmed(_)));
    let second = store.confirm_registration(registration.id, now).await.unwrap();
    assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed));

    let stored = store.registration(registration.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn cancel_writes_exactly_one_promotion_job() {
    let store = get_test_store().await;
    let event = open_event(5, 0);
    store.insert_event(event.clone()).await.unwrap();
    let user = UserId::new();
    let now = Utc::now();

    let ReservationOutcome::Reserved { registration, .. } = store
        .try_reserve(event.id, user, TicketType::Regular, now)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };

    let outcome = store
        .cancel_registration(registration.id, user, now)
        .await
        .unwrap();
    assert!(matches!(outcome, CancelOutcome::Cancelled { .. }));

    let jobs = store.claim_promotion_jobs(10, now).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].event_id, event.id);

    // Repeat cancel is a no-op and writes no second job.
    let outcome = store
        .cancel_registration(registration.id, user, now)
        .await
        .unwrap();
    assert!(matches!(outcome, CancelOutcome::AlreadyCancelled));
    assert!(store.claim_promotion_jobs(10, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_rejects_other_users_and_started_events() {
    let store = get_test_store().await;
    let event = open_event(5, 0);
    store.insert_event(event.clone()).await.unwrap();
    let owner = UserId::new();
    let now = Utc::now();

    let ReservationOutcome::Reserved { registration, .. } = store
        .try_reserve(event.id, owner, TicketType::Regular, now)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };

    let outcome = store
        .cancel_registration(registration.id, UserId::new(), now)
        .await
        .unwrap();
    assert!(matches!(outcome, CancelOutcome::NotOwner));

    let outcome = store
        .cancel_registration(registration.id, owner, event.starts_at + Duration::hours(1))
        .await
        .unwrap();
    assert!(matches!(outcome, CancelOutcome::EventStarted));
}

#[tokio::test]
async fn convert_entry_re_checks_capacity() {
    let store = get_test_store().await;
    let event = open_event(1, 2_500);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    let waiting = UserId::new();
    store
        .enqueue_waitlist(event.id, waiting, TicketType::Regular, now)
        .await
        .unwrap();
    let entry = store.peek_waitlist(event.id, 1).await.unwrap().remove(0);

    // Seat is still taken: the entry must stay in the queue.
    let outcome = store.convert_entry(entry.id, now).await.unwrap();
    assert!(matches!(outcome, ConvertOutcome::NoCapacity));
    assert_eq!(store.waitlist_for_event(event.id).await.unwrap().len(), 1);

    // Free the seat, then conversion succeeds and the entry leaves
    // the active queue.
    sqlx::query("UPDATE registrations SET status = 'CANCELLED' WHERE event_id = $1")
        .bind(event.id.as_uuid())
        .execute(store.pool())
        .await
        .unwrap();
    let outcome = store.convert_entry(entry.id, now).await.unwrap();
    let ConvertOutcome::Converted {
        registration,
        payment_required,
    } = outcome
    else {
        panic!("expected conversion");
    };
    assert_eq!(registration.user_id, waiting);
    assert!(payment_required);
    assert!(store.waitlist_for_event(event.id).await.unwrap().is_empty());

    // A second attempt on the same entry is skipped.
    let outcome = store.convert_entry(entry.id, now).await.unwrap();
    assert!(matches!(
        outcome,
        ConvertOutcome::Skipped {
            reason: SkipReason::EntryNotActive
        }
    ));
}

#[tokio::test]
async fn expire_pending_cancels_old_rows_and_queues_promotions() {
    let store = get_test_store().await;
    let event = open_event(5, 5_000);
    store.insert_event(event.clone()).await.unwrap();

    let old = Utc::now() - Duration::hours(2);
    let fresh = Utc::now();
    let ReservationOutcome::Reserved {
        registration: stale,
        ..
    } = store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, old)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };
    store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, fresh)
        .await
        .unwrap();

    let cutoff = Utc::now() - Duration::minutes(30);
    let expired = store.expire_pending(cutoff, Utc::now()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, stale.id);
    assert_eq!(expired[0].status, RegistrationStatus::Cancelled);

    let jobs = store.claim_promotion_jobs(10, Utc::now()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].event_id, event.id);
    assert_eq!(store.active_count(event.id).await.unwrap(), 1);
}

#[tokio::test]
async fn claimed_jobs_are_leased_until_completed() {
    let store = get_test_store().await;
    let event = open_event(5, 0);
    store.insert_event(event.clone()).await.unwrap();
    let user = UserId::new();
    let now = Utc::now();

    let ReservationOutcome::Reserved { registration, .. } = store
        .try_reserve(event.id, user, TicketType::Regular, now)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };
    store
        .cancel_registration(registration.id, user, now)
        .await
        .unwrap();

    // Within the lease window the job belongs to one worker.
    let first = store.claim_promotion_jobs(10, now).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(store.claim_promotion_jobs(10, now).await.unwrap().is_empty());

    // A claim that never completes is offered again after the lease,
    // so a worker dying mid-pass cannot strand the job.
    let later = now + Duration::seconds(PROMOTION_JOB_LEASE_SECS + 1);
    let reclaimed = store.claim_promotion_jobs(10, later).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, first[0].id);

    // Completion retires the job permanently.
    let ids: Vec<i64> = reclaimed.iter().map(|j| j.id).collect();
    store.complete_promotion_jobs(&ids, later).await.unwrap();
    let much_later = later + Duration::seconds(PROMOTION_JOB_LEASE_SECS + 1);
    assert!(
        store
            .claim_promotion_jobs(10, much_later)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn raising_capacity_writes_a_promotion_job() {
    let store = get_test_store().await;
    let mut event = open_event(1, 0);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    event.capacity = 3;
    assert!(store.update_event(event.clone(), now).await.unwrap());
    let jobs = store.claim_promotion_jobs(10, now).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].event_id, event.id);

    // Unchanged and lowered capacity leave the outbox alone.
    assert!(!store.update_event(event.clone(), now).await.unwrap());
    event.capacity = 2;
    assert!(!store.update_event(event, now).await.unwrap());
    assert!(store.claim_promotion_jobs(10, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn event_stats_and_participant_status_report_the_queue() {
    let store = get_test_store().await;
    let event = open_event(2, 0);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    let registered = UserId::new();
    let waiting = UserId::new();
    let ReservationOutcome::Reserved { registration, .. } = store
        .try_reserve(event.id, registered, TicketType::Regular, now)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };
    store.confirm_registration(registration.id, now).await.unwrap();
    store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap();
    store
        .enqueue_waitlist(event.id, waiting, TicketType::Regular, now)
        .await
        .unwrap();

    let stats = store.event_stats(event.id).await.unwrap().unwrap();
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.confirmed, 1);
    assert_eq!(stats.waitlisted, 1);
    assert_eq!(stats.available, 0);

    assert!(matches!(
        store.participant_status(event.id, registered).await.unwrap(),
        ParticipantStatus::Registered { .. }
    ));
    assert!(matches!(
        store.participant_status(event.id, waiting).await.unwrap(),
        ParticipantStatus::Waitlisted { entry } if entry.position == 1
    ));
    assert!(matches!(
        store.participant_status(event.id, UserId::new()).await.unwrap(),
        ParticipantStatus::None
    ));
}

#[tokio::test]
async fn mark_payment_failed_only_cancels_pending_rows() {
    let store = get_test_store().await;
    let event = open_event(5, 5_000);
    store.insert_event(event.clone()).await.unwrap();
    let now = Utc::now();

    let ReservationOutcome::Reserved { registration, .. } = store
        .try_reserve(event.id, UserId::new(), TicketType::Regular, now)
        .await
        .unwrap()
    else {
        panic!("expected a reservation");
    };

    let outcome = store.mark_payment_failed(registration.id, now).await.unwrap();
    assert!(matches!(outcome, PaymentFailOutcome::Cancelled { .. }));
    let stored = store.registration(registration.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RegistrationStatus::Cancelled);

    // A late duplicate failure signal is a no-op that reports the
    // status it found.
    let outcome = store.mark_payment_failed(registration.id, now).await.unwrap();
    assert_eq!(
        outcome,
        PaymentFailOutcome::Unchanged {
            status: RegistrationStatus::Cancelled
        }
    );
    assert_eq!(store.claim_promotion_jobs(10, now).await.unwrap().len(), 1);
}
