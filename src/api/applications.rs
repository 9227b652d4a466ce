use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::NewApplication;
use crate::model::{Actor, Application, ApplicationStatus};

use super::slots::date_range;
use super::{AppResult, AppState, DataResponse};

#[derive(Debug, Deserialize)]
pub struct CreateApplication {
    pub id: Option<Ulid>,
    pub user_id: Ulid,
    pub opportunity_id: Ulid,
    pub time_slot_id: Option<Ulid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub draft: bool,
}

/// Returns 201 with the PENDING (or DRAFT) application. A refused
/// reservation stores nothing.
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateApplication>, JsonRejection>,
) -> AppResult<(StatusCode, Json<DataResponse<Application>>)> {
    let Json(body) = body?;
    let application = state
        .engine
        .create_application(NewApplication {
            id: body.id.unwrap_or_else(Ulid::new),
            user_id: body.user_id,
            opportunity_id: body.opportunity_id,
            time_slot_id: body.time_slot_id,
            range: date_range(body.start_date, body.end_date)?,
            draft: body.draft,
        })
        .await?;
    Ok((StatusCode::CREATED, DataResponse::json(application)))
}

pub async fn get_one(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> AppResult<Json<DataResponse<Application>>> {
    let Path(id) = id?;
    Ok(DataResponse::json(state.engine.get_application(id).await?))
}

pub async fn list_for_opportunity(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> AppResult<Json<DataResponse<Vec<Application>>>> {
    let Path(opportunity_id) = id?;
    Ok(DataResponse::json(
        state.engine.list_applications(opportunity_id).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct Transition {
    pub status: ApplicationStatus,
    pub actor: Actor,
}

pub async fn transition(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<Transition>, JsonRejection>,
) -> AppResult<Json<DataResponse<Application>>> {
    let Path(id) = id?;
    let Json(body) = body?;
    let application = state
        .engine
        .transition_application(id, body.status, body.actor)
        .await?;
    Ok(DataResponse::json(application))
}
