//! Event, registration-intake and waitlist endpoints.

use std::sync::Arc;

use allocator::{Allocator, NotificationService, RegisterOutcome};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{EventId, TicketType, UserId};
use domain::{EventRecord, EventStatus, Registration, WaitlistEntry};
use serde::{Deserialize, Serialize};
use store::{AllocatorStore, ParticipantStatus};
use uuid::Uuid;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, N> {
    pub allocator: Arc<Allocator<S, N>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub capacity: i32,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub price_cents: i64,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub ticket_type: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct EventResponse {
    pub id: String,
    pub capacity: i32,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub price_cents: i64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub capacity: i32,
    pub pending: i64,
    pub confirmed: i64,
    pub waitlisted: i64,
    pub available: i64,
}

#[derive(Serialize)]
pub struct RegistrationResponse {
    pub registration_id: String,
    pub event_id: String,
    pub user_id: String,
    pub ticket_type: String,
    pub status: String,
    pub payment_required: bool,
}

#[derive(Serialize)]
pub struct WaitlistedResponse {
    pub event_id: String,
    pub user_id: String,
    pub position: i64,
}

#[derive(Serialize)]
pub struct WaitlistEntryResponse {
    pub user_id: String,
    pub position: i64,
    pub ticket_type: String,
}

/// Either a seat or a waitlist spot, depending on capacity.
#[derive(Serialize)]
#[serde(untagged)]
pub enum RegisterResponse {
    Seated(RegistrationResponse),
    Waitlisted(WaitlistedResponse),
}

#[derive(Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusResponse {
    Registered { registration: RegistrationResponse },
    Waitlisted { position: i64, ticket_type: String },
    None,
}

impl EventResponse {
    fn from_record(event: &EventRecord) -> Self {
        Self {
            id: event.id.to_string(),
            capacity: event.capacity,
            status: event.status.as_str().to_string(),
            starts_at: event.starts_at,
            price_cents: event.price_cents,
        }
    }
}

fn registration_response(registration: &Registration, payment_required: bool) -> RegistrationResponse {
    RegistrationResponse {
        registration_id: registration.id.to_string(),
        event_id: registration.event_id.to_string(),
        user_id: registration.user_id.to_string(),
        ticket_type: registration.ticket_type.as_str().to_string(),
        status: registration.status.as_str().to_string(),
        payment_required,
    }
}

fn entry_response(entry: &WaitlistEntry) -> WaitlistEntryResponse {
    WaitlistEntryResponse {
        user_id: entry.user_id.to_string(),
        position: entry.position,
        ticket_type: entry.ticket_type.as_str().to_string(),
    }
}

fn parse_ticket_type(raw: &Option<String>) -> Result<TicketType, ApiError> {
    match raw {
        None => Ok(TicketType::Regular),
        Some(s) => s
            .parse()
            .map_err(|e: String| ApiError::BadRequest(format!("Invalid ticket_type: {e}"))),
    }
}

// -- Handlers --

/// POST /events — create a new event.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    if req.capacity < 0 {
        return Err(ApiError::BadRequest("capacity must be >= 0".to_string()));
    }
    if req.price_cents < 0 {
        return Err(ApiError::BadRequest("price_cents must be >= 0".to_string()));
    }
    let status = match &req.status {
        None => EventStatus::Published,
        Some(s) => s
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid status: {s}")))?,
    };

    let event = EventRecord {
        id: EventId::new(),
        capacity: req.capacity,
        status,
        starts_at: req.starts_at,
        price_cents: req.price_cents,
    };
    state.allocator.create_event(event.clone()).await?;

    Ok((StatusCode::CREATED, Json(EventResponse::from_record(&event))))
}

/// GET /events/:id — event details.
#[tracing::instrument(skip(state))]
pub async fn get<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventResponse>, ApiError> {
    let event = state
        .allocator
        .event(EventId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {id} not found")))?;
    Ok(Json(EventResponse::from_record(&event)))
}

/// GET /events/:id/stats — occupancy counts.
#[tracing::instrument(skip(state))]
pub async fn stats<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state
        .allocator
        .stats(EventId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {id} not found")))?;
    Ok(Json(StatsResponse {
        capacity: stats.capacity,
        pending: stats.pending,
        confirmed: stats.confirmed,
        waitlisted: stats.waitlisted,
        available: stats.available,
    }))
}

/// GET /events/:id/waitlist — active entries in promotion order.
#[tracing::instrument(skip(state))]
pub async fn waitlist<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<WaitlistEntryResponse>>, ApiError> {
    let entries = state.allocator.waitlist(EventId::from_uuid(id)).await?;
    Ok(Json(entries.iter().map(entry_response).collect()))
}

/// POST /events/:id/registrations — ask for a seat; falls back to the
/// waitlist when the event is full.
#[tracing::instrument(skip(state, req), fields(event_id = %id))]
pub async fn register<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let event_id = EventId::from_uuid(id);
    let user_id = UserId::from_uuid(req.user_id);
    let ticket_type = parse_ticket_type(&req.ticket_type)?;

    let outcome = state.allocator.register(event_id, user_id, ticket_type).await?;
    match outcome {
        RegisterOutcome::Registered { registration } => Ok((
            StatusCode::CREATED,
            Json(RegisterResponse::Seated(registration_response(
                &registration,
                true,
            ))),
        )),
        RegisterOutcome::Confirmed { registration } => Ok((
            StatusCode::CREATED,
            Json(RegisterResponse::Seated(registration_response(
                &registration,
                false,
            ))),
        )),
        RegisterOutcome::Waitlisted { position } => Ok((
            StatusCode::ACCEPTED,
            Json(RegisterResponse::Waitlisted(WaitlistedResponse {
                event_id: event_id.to_string(),
                user_id: user_id.to_string(),
                position,
            })),
        )),
        RegisterOutcome::AlreadyActive => Err(ApiError::Conflict(
            "User already registered or waitlisted for this event".to_string(),
        )),
        RegisterOutcome::EventNotOpen => Err(ApiError::Conflict(
            "Event is not accepting registrations".to_string(),
        )),
        RegisterOutcome::EventNotFound => {
            Err(ApiError::NotFound(format!("Event {id} not found")))
        }
    }
}

/// GET /events/:id/participants/:user_id — where the user stands.
#[tracing::instrument(skip(state))]
pub async fn participant_status<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state
        .allocator
        .status(EventId::from_uuid(id), UserId::from_uuid(user_id))
        .await?;
    let response = match status {
        ParticipantStatus::Registered { registration } => {
            let payment_required = registration.status == domain::RegistrationStatus::Pending;
            StatusResponse::Registered {
                registration: registration_response(&registration, payment_required),
            }
        }
        ParticipantStatus::Waitlisted { entry } => StatusResponse::Waitlisted {
            position: entry.position,
            ticket_type: entry.ticket_type.as_str().to_string(),
        },
        ParticipantStatus::None => StatusResponse::None,
    };
    Ok(Json(response))
}

/// DELETE /events/:id/waitlist/:user_id — leave the waitlist.
#[tracing::instrument(skip(state))]
pub async fn leave_waitlist<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .allocator
        .leave_waitlist(EventId::from_uuid(id), UserId::from_uuid(user_id))
        .await?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(
            "No active waitlist entry for this user".to_string(),
        ))
    }
}
