//! Payment provider webhook endpoint.
//!
//! The provider may deliver signals more than once and out of order.
//! Signals that no longer apply are acknowledged without effect so
//! the provider stops retrying them.

use std::sync::Arc;

use allocator::NotificationService;
use axum::Json;
use axum::extract::State;
use common::RegistrationId;
use serde::{Deserialize, Serialize};
use store::{AllocatorStore, ConfirmOutcome, PaymentFailOutcome};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::events::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSignal {
    Succeeded,
    Failed,
}

#[derive(Deserialize)]
pub struct PaymentWebhookRequest {
    pub registration_id: Uuid,
    pub signal: PaymentSignal,
}

#[derive(Serialize)]
pub struct PaymentWebhookResponse {
    pub registration_id: String,
    /// False when the signal arrived late or twice and changed nothing.
    pub applied: bool,
    pub status: String,
}

/// POST /payments/webhook — apply a payment outcome to a registration.
#[tracing::instrument(skip(state, req))]
pub async fn webhook<S: AllocatorStore + 'static, N: NotificationService + 'static>(
    State(state): State<Arc<AppState<S, N>>>,
    Json(req): Json<PaymentWebhookRequest>,
) -> Result<Json<PaymentWebhookResponse>, ApiError> {
    let registration_id = RegistrationId::from_uuid(req.registration_id);

    let (applied, status) = match req.signal {
        PaymentSignal::Succeeded => match state.allocator.payment_succeeded(registration_id).await? {
            ConfirmOutcome::Confirmed(_) => (true, "CONFIRMED"),
            ConfirmOutcome::AlreadyConfirmed => (false, "CONFIRMED"),
            ConfirmOutcome::AlreadyCancelled => (false, "CANCELLED"),
            ConfirmOutcome::NotFound => {
                return Err(ApiError::NotFound(format!(
                    "Registration {} not found",
                    req.registration_id
                )));
            }
        },
        // The echoed status comes out of the same atomic store check
        // that decided whether to cancel, so a concurrent transition
        // cannot make the response lie about what the signal did.
        PaymentSignal::Failed => match state.allocator.payment_failed(registration_id).await? {
            PaymentFailOutcome::Cancelled { .. } => (true, "CANCELLED"),
            PaymentFailOutcome::Unchanged { status } => (false, status.as_str()),
            PaymentFailOutcome::NotFound => {
                return Err(ApiError::NotFound(format!(
                    "Registration {} not found",
                    req.registration_id
                )));
            }
        },
    };

    Ok(Json(PaymentWebhookResponse {
        registration_id: req.registration_id.to_string(),
        applied,
        status: status.to_string(),
    }))
}
