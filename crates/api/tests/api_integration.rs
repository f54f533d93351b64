//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use allocator::{AllocatorConfig, InMemoryNotificationService};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

use api::routes::events::AppState;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type TestState = Arc<AppState<InMemoryStore, InMemoryNotificationService>>;

fn setup() -> (axum::Router, TestState) {
    let state = api::create_state(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryNotificationService::new()),
        AllocatorConfig::default(),
    );
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Creates a published paid event and returns its id.
async fn create_event(app: &axum::Router, capacity: i32, price_cents: i64) -> String {
    let starts_at = Utc::now() + chrono::Duration::days(7);
    let response = app
        .clone()
        .oneshot(post_json(
            "/events",
            json!({
                "capacity": capacity,
                "starts_at": starts_at,
                "price_cents": price_cents,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "api");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_and_fetch_event() {
    let (app, _) = setup();
    let event_id = create_event(&app, 10, 2_500).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/events/{event_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["capacity"], 10);
    assert_eq!(body["status"], "PUBLISHED");
    assert_eq!(body["price_cents"], 2_500);

    let response = app
        .oneshot(get(&format!("/events/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_event_rejects_negative_capacity() {
    let (app, _) = setup();
    let response = app
        .oneshot(post_json(
            "/events",
            json!({ "capacity": -1, "starts_at": Utc::now() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_fills_seats_then_waitlists() {
    let (app, _) = setup();
    let event_id = create_event(&app, 1, 5_000).await;
    let uri = format!("/events/{event_id}/registrations");

    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({ "user_id": uuid::Uuid::new_v4() })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["payment_required"], true);

    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({ "user_id": uuid::Uuid::new_v4() })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    assert_eq!(body["position"], 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/events/{event_id}/stats")))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["pending"], 1);
    assert_eq!(body["waitlisted"], 1);
    assert_eq!(body["available"], 0);
}

#[tokio::test]
async fn test_free_event_confirms_immediately() {
    let (app, _) = setup();
    let event_id = create_event(&app, 5, 0).await;

    let response = app
        .oneshot(post_json(
            &format!("/events/{event_id}/registrations"),
            json!({ "user_id": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["status"], "CONFIRMED");
    assert_eq!(body["payment_required"], false);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let (app, _) = setup();
    let event_id = create_event(&app, 5, 0).await;
    let uri = format!("/events/{event_id}/registrations");
    let user = uuid::Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({ "user_id": user })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(post_json(&uri, json!({ "user_id": user })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_ticket_type_is_rejected() {
    let (app, _) = setup();
    let event_id = create_event(&app, 5, 0).await;

    let response = app
        .oneshot(post_json(
            &format!("/events/{event_id}/registrations"),
            json!({ "user_id": uuid::Uuid::new_v4(), "ticket_type": "PLATINUM" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_then_promotion_seats_the_waitlist_head() {
    let (app, state) = setup();
    let event_id = create_event(&app, 1, 2_500).await;
    let uri = format!("/events/{event_id}/registrations");
    let alice = uuid::Uuid::new_v4();
    let bob = uuid::Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({ "user_id": alice })))
        .await
        .unwrap();
    let registration_id = read_json(response).await["registration_id"]
        .as_str()
        .unwrap()
        .to_string();
    app.clone()
        .oneshot(post_json(&uri, json!({ "user_id": bob })))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/registrations/{registration_id}/cancel"),
            json!({ "user_id": alice }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "CANCELLED");

    // The worker is not running in these tests; drain the jobs inline.
    let report = state.allocator.run_promotions(10).await.unwrap();
    assert_eq!(report.converted, 1);

    let response = app
        .oneshot(get(&format!("/events/{event_id}/participants/{bob}")))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["state"], "registered");
    assert_eq!(body["registration"]["status"], "PENDING");
}

#[tokio::test]
async fn test_cancel_by_another_user_is_forbidden() {
    let (app, _) = setup();
    let event_id = create_event(&app, 5, 0).await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/events/{event_id}/registrations"),
            json!({ "user_id": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    let registration_id = read_json(response).await["registration_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(post_json(
            &format!("/registrations/{registration_id}/cancel"),
            json!({ "user_id": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_payment_webhook_is_idempotent() {
    let (app, _) = setup();
    let event_id = create_event(&app, 5, 5_000).await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/events/{event_id}/registrations"),
            json!({ "user_id": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    let registration_id = read_json(response).await["registration_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            "/payments/webhook",
            json!({ "registration_id": registration_id, "signal": "succeeded" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["status"], "CONFIRMED");

    // Duplicate success and a late failure both change nothing.
    let response = app
        .clone()
        .oneshot(post_json(
            "/payments/webhook",
            json!({ "registration_id": registration_id, "signal": "succeeded" }),
        ))
        .await
        .unwrap();
    assert_eq!(read_json(response).await["applied"], false);

    let response = app
        .clone()
        .oneshot(post_json(
            "/payments/webhook",
            json!({ "registration_id": registration_id, "signal": "failed" }),
        ))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["applied"], false);
    assert_eq!(body["status"], "CONFIRMED");
}

#[tokio::test]
async fn test_payment_failure_webhook_echoes_the_resulting_status() {
    let (app, _) = setup();
    let event_id = create_event(&app, 5, 5_000).await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/events/{event_id}/registrations"),
            json!({ "user_id": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    let registration_id = read_json(response).await["registration_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            "/payments/webhook",
            json!({ "registration_id": registration_id, "signal": "failed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["status"], "CANCELLED");

    // The duplicate observes the cancellation the first signal made,
    // not a status read outside the cancel decision.
    let response = app
        .oneshot(post_json(
            "/payments/webhook",
            json!({ "registration_id": registration_id, "signal": "failed" }),
        ))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["applied"], false);
    assert_eq!(body["status"], "CANCELLED");
}

#[tokio::test]
async fn test_leave_waitlist() {
    let (app, _) = setup();
    let event_id = create_event(&app, 0, 0).await;
    let user = uuid::Uuid::new_v4();

    app.clone()
        .oneshot(post_json(
            &format!("/events/{event_id}/registrations"),
            json!({ "user_id": user }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/events/{event_id}/waitlist/{user}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/events/{event_id}/waitlist/{user}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_user_registrations_listing() {
    let (app, _) = setup();
    let user = uuid::Uuid::new_v4();
    let first = create_event(&app, 5, 0).await;
    let second = create_event(&app, 5, 0).await;
    for event_id in [&first, &second] {
        app.clone()
            .oneshot(post_json(
                &format!("/events/{event_id}/registrations"),
                json!({ "user_id": user }),
            ))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(get(&format!("/users/{user}/registrations")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
