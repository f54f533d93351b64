//! HTTP API server for the event seat allocator.
//!
//! Provides REST endpoints for events, registrations, waitlists and
//! payment webhooks, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use allocator::{Allocator, AllocatorConfig, NotificationService};
use axum::Router;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::AllocatorStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::events::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, N>(state: Arc<AppState<S, N>>, metrics_handle: PrometheusHandle) -> Router
where
    S: AllocatorStore + 'static,
    N: NotificationService + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/events", post(routes::events::create::<S, N>))
        .route("/events/{id}", get(routes::events::get::<S, N>))
        .route("/events/{id}/stats", get(routes::events::stats::<S, N>))
        .route("/events/{id}/waitlist", get(routes::events::waitlist::<S, N>))
        .route(
            "/events/{id}/registrations",
            post(routes::events::register::<S, N>),
        )
        .route(
            "/events/{id}/participants/{user_id}",
            get(routes::events::participant_status::<S, N>),
        )
        .route(
            "/events/{id}/waitlist/{user_id}",
            delete(routes::events::leave_waitlist::<S, N>),
        )
        .route("/registrations/{id}", get(routes::registrations::get::<S, N>))
        .route(
            "/registrations/{id}/cancel",
            post(routes::registrations::cancel::<S, N>),
        )
        .route(
            "/users/{id}/registrations",
            get(routes::registrations::for_user::<S, N>),
        )
        .route("/payments/webhook", post(routes::payments::webhook::<S, N>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over an arbitrary store and notifier.
pub fn create_state<S, N>(
    store: Arc<S>,
    notifier: Arc<N>,
    config: AllocatorConfig,
) -> Arc<AppState<S, N>>
where
    S: AllocatorStore,
    N: NotificationService,
{
    let allocator = Arc::new(Allocator::new(store, notifier, config));
    Arc::new(AppState { allocator })
}
