use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use ulid::Ulid;

use stayledger::api::{self, AppState};
use stayledger::engine::{Engine, EngineConfig};
use stayledger::notify::NotifyHub;

/// Build the full router over a fresh engine backed by a throwaway WAL.
///
/// Uses the same middleware stack as `main`, with a 30-second request
/// timeout.
pub fn build_test_app() -> Router {
    let dir = std::env::temp_dir().join("stayledger_api_tests");
    std::fs::create_dir_all(&dir).unwrap();
    let wal_path = dir.join(format!("{}.wal", Ulid::new()));
    let engine =
        Engine::new(wal_path, Arc::new(NotifyHub::new()), EngineConfig::default()).unwrap();
    api::router(
        AppState {
            engine: Arc::new(engine),
        },
        Duration::from_secs(30),
    )
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn send_json(app: Router, method: Method, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send_json(app, Method::POST, uri, body).await
}

pub async fn put_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send_json(app, Method::PUT, uri, body).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Create an opportunity with one June 2025 slot. Returns
/// `(opportunity_id, slot_id)` as strings.
pub async fn seed_june(app: &Router, capacity: u32, minimum_stay: u32) -> (String, String) {
    let response = post_json(
        app.clone(),
        "/api/v1/opportunities",
        serde_json::json!({ "host_id": Ulid::new(), "title": "Farm stay" }),
    )
    .await;
    assert_eq!(response.status(), 201);
    let opp = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let response = post_json(
        app.clone(),
        &format!("/api/v1/opportunities/{opp}/slots"),
        serde_json::json!({
            "start_date": "2025-06-01",
            "end_date": "2025-06-30",
            "default_capacity": capacity,
            "minimum_stay": minimum_stay,
        }),
    )
    .await;
    assert_eq!(response.status(), 201);
    let slot = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_owned();
    (opp, slot)
}
