//! HTTP surface over the engine.
//!
//! All success bodies use a `{ "data": ... }` envelope; errors are
//! `{ "error": message, "code": CODE }` (see [`error::AppError`]).

pub mod applications;
pub mod error;
pub mod events;
pub mod opportunities;
pub mod slots;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::engine::Engine;
use crate::observability;

pub use error::{AppError, AppResult};

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> DataResponse<T> {
    pub fn json(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// The full application router with its middleware stack. Shared by `main`
/// and the integration tests.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(middleware::from_fn(track_metrics))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/opportunities",
            get(opportunities::list).post(opportunities::create),
        )
        .route("/opportunities/{id}", get(opportunities::get_one))
        .route(
            "/opportunities/{id}/applications",
            get(applications::list_for_opportunity),
        )
        .route("/opportunities/{id}/events", get(events::stream))
        .route(
            "/opportunities/{id}/slots",
            get(slots::list).post(slots::open),
        )
        .route("/opportunities/{id}/slots/{slot}", get(slots::get_one))
        .route("/opportunities/{id}/slots/{slot}/close", post(slots::close))
        .route("/opportunities/{id}/slots/{slot}/reopen", post(slots::reopen))
        .route(
            "/opportunities/{id}/slots/{slot}/capacity",
            get(slots::capacity).post(slots::ensure_range),
        )
        .route(
            "/opportunities/{id}/slots/{slot}/capacity/{date}",
            put(slots::set_day_capacity),
        )
        .route("/applications", post(applications::create))
        .route("/applications/{id}", get(applications::get_one))
        .route(
            "/applications/{id}/transitions",
            post(applications::transition),
        )
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "opportunities": state.engine.state.len(),
    }))
}

/// RED metrics per matched route.
async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(started.elapsed().as_secs_f64());
    metrics::counter!(observability::HTTP_REQUESTS_TOTAL, "route" => route, "status" => status)
        .increment(1);
    response
}
