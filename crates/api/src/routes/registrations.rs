//! Registration lookup and cancellation endpoints.

use std::sync::Arc;

use allocator::NotificationService;
use axum::Json;
use axum::extract::{Path, State};
use common::{RegistrationId, UserId};
use serde::Deserialize;
use store::{AllocatorStore, CancelOutcome};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::events::{AppState, RegistrationResponse};

#[derive(Deserialize)]
pub struct CancelRequest {
    pub user_id: Uuid,
}

fn response(registration: &domain::Registration) -> RegistrationResponse {
    let payment_required = registration.status == domain::RegistrationStatus::Pending;
    RegistrationResponse {
        registration_id: registration.id.to_string(),
        event_id: registration.event_id.to_string(),
        user_id: registration.user_id.to_string(),
        ticket_type: registration.ticket_type.as_str().to_string(),
        status: registration.status.as_str().to_string(),
        payment_required,
    }
}

/// GET /registrations/:id — load a registration by ID.
#[tracing::instrument(skip(state))]
pub async fn get<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let registration = state
        .allocator
        .registration(RegistrationId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Registration {id} not found")))?;
    Ok(Json(response(&registration)))
}

/// POST /registrations/:id/cancel — cancel a registration on behalf
/// of its owner. Frees the seat for the waitlist.
#[tracing::instrument(skip(state, req), fields(registration_id = %id))]
pub async fn cancel<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let outcome = state
        .allocator
        .cancel(RegistrationId::from_uuid(id), UserId::from_uuid(req.user_id))
        .await?;

    match outcome {
        CancelOutcome::Cancelled { registration } => Ok(Json(response(&registration))),
        CancelOutcome::AlreadyCancelled => Err(ApiError::Conflict(
            "Registration is already cancelled".to_string(),
        )),
        CancelOutcome::EventStarted => Err(ApiError::Conflict(
            "Event has already started".to_string(),
        )),
        CancelOutcome::NotOwner => Err(ApiError::Forbidden(
            "Registration belongs to another user".to_string(),
        )),
        CancelOutcome::NotFound => {
            Err(ApiError::NotFound(format!("Registration {id} not found")))
        }
    }
}

/// GET /users/:id/registrations — all of a user's registrations,
/// newest first.
#[tracing::instrument(skip(state))]
pub async fn for_user<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RegistrationResponse>>, ApiError> {
    let registrations = state
        .allocator
        .registrations_for_user(UserId::from_uuid(id))
        .await?;
    Ok(Json(registrations.iter().map(response).collect()))
}
