//! HTTP-level tests: routing, status codes, and the error envelope.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post_json, put_json, seed_june};
use serde_json::json;
use ulid::Ulid;

fn apply_body(opp: &str, slot: &str, start: &str, end: &str) -> serde_json::Value {
    json!({
        "user_id": Ulid::new(),
        "opportunity_id": opp,
        "time_slot_id": slot,
        "start_date": start,
        "end_date": end,
    })
}

// ---------------------------------------------------------------------------
// Health and routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok() {
    let app = common::build_test_app();
    let response = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["opportunities"], 0);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = common::build_test_app();
    let response = get(app, "/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Opportunities and slots
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_slot_creates_day_records() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 2, 0).await;

    let uri = format!("/api/v1/opportunities/{opp}/slots/{slot}/capacity");
    let response = get(app.clone(), &format!("{uri}?start=2025-06-01&end=2025-06-30")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let records = body_json(response).await["data"].as_array().unwrap().clone();
    assert_eq!(records.len(), 30);
    assert!(records.iter().all(|r| r["capacity"] == 2 && r["booked_count"] == 0));

    let response = get(app, &format!("/api/v1/opportunities/{opp}/slots")).await;
    let slots = body_json(response).await;
    assert_eq!(slots["data"][0]["bookable_days"], 30);
    assert_eq!(slots["data"][0]["status"], "OPEN");
}

#[tokio::test]
async fn unknown_opportunity_is_404() {
    let app = common::build_test_app();
    let response = get(app, &format!("/api/v1/opportunities/{}", Ulid::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_id_is_400() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/opportunities/not-a-ulid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn malformed_json_is_400() {
    let app = common::build_test_app();
    let response = post_json(app, "/api/v1/opportunities", json!({ "title": 7 })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn reversed_slot_window_is_400() {
    let app = common::build_test_app();
    let (opp, _) = seed_june(&app, 1, 0).await;
    let response = post_json(
        app,
        &format!("/api/v1/opportunities/{opp}/slots"),
        json!({ "start_date": "2025-07-10", "end_date": "2025-07-01", "default_capacity": 1 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn capacity_override_below_booked_is_409() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 2, 0).await;
    for _ in 0..2 {
        let response = post_json(
            app.clone(),
            "/api/v1/applications",
            apply_body(&opp, &slot, "2025-06-10", "2025-06-10"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let uri = format!("/api/v1/opportunities/{opp}/slots/{slot}/capacity/2025-06-10");
    let response = put_json(app.clone(), &uri, json!({ "capacity": 1 })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CAPACITY_BELOW_BOOKED");

    let response = put_json(app, &uri, json!({ "capacity": 5 })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["data"]["capacity"], 5);
    assert_eq!(record["data"]["booked_count"], 2);
}

#[tokio::test]
async fn closed_slot_refuses_applications() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 1, 0).await;
    let response = post_json(
        app.clone(),
        &format!("/api/v1/opportunities/{opp}/slots/{slot}/close"),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "CLOSED");

    let response = post_json(
        app,
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-10", "2025-06-12"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "SLOT_CLOSED");
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn application_reserves_and_second_is_refused() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 1, 0).await;

    let response = post_json(
        app.clone(),
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-10", "2025-06-12"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["data"]["status"], "PENDING");
    assert_eq!(created["data"]["duration_days"], 3);

    let response = post_json(
        app.clone(),
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-12", "2025-06-14"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CAPACITY_EXCEEDED");
    assert!(body["error"].as_str().unwrap().contains("2025-06-12"));

    let response = get(app, &format!("/api/v1/opportunities/{opp}/applications")).await;
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn minimum_stay_is_422() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 3, 4).await;
    let response = post_json(
        app,
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-10", "2025-06-12"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "MINIMUM_STAY_VIOLATION");
}

#[tokio::test]
async fn out_of_window_is_422() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 3, 0).await;
    let response = post_json(
        app,
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-29", "2025-07-02"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "DATE_RANGE_OUT_OF_BOUNDS");
}

#[tokio::test]
async fn cancelling_frees_the_days() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 1, 0).await;

    let response = post_json(
        app.clone(),
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-10", "2025-06-12"),
    )
    .await;
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let response = post_json(
        app.clone(),
        &format!("/api/v1/applications/{id}/transitions"),
        json!({ "status": "CANCELLED", "actor": "USER" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "CANCELLED");
    assert_eq!(body["data"]["initiated_by"], "USER");

    let response = post_json(
        app,
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-10", "2025-06-12"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn user_cannot_reject() {
    let app = common::build_test_app();
    let (opp, slot) = seed_june(&app, 1, 0).await;
    let response = post_json(
        app.clone(),
        "/api/v1/applications",
        apply_body(&opp, &slot, "2025-06-10", "2025-06-12"),
    )
    .await;
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let uri = format!("/api/v1/applications/{id}/transitions");
    let response = post_json(
        app.clone(),
        &uri,
        json!({ "status": "REJECTED", "actor": "USER" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = post_json(
        app.clone(),
        &uri,
        json!({ "status": "COMPLETED", "actor": "HOST" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "INVALID_TRANSITION");

    let response = post_json(app, &uri, json!({ "status": "REJECTED", "actor": "HOST" })).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_application_is_404() {
    let app = common::build_test_app();
    let response = get(app, &format!("/api/v1/applications/{}", Ulid::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
