use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::OpportunityInfo;

use super::{AppResult, AppState, DataResponse};

#[derive(Debug, Deserialize)]
pub struct CreateOpportunity {
    /// Client-chosen id; generated when absent.
    pub id: Option<Ulid>,
    pub host_id: Ulid,
    pub title: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateOpportunity>, JsonRejection>,
) -> AppResult<(StatusCode, Json<DataResponse<OpportunityInfo>>)> {
    let Json(body) = body?;
    let info = state
        .engine
        .create_opportunity(body.id.unwrap_or_else(Ulid::new), body.host_id, body.title)
        .await?;
    Ok((StatusCode::CREATED, DataResponse::json(info)))
}

pub async fn list(State(state): State<AppState>) -> Json<DataResponse<Vec<OpportunityInfo>>> {
    DataResponse::json(state.engine.list_opportunities().await)
}

pub async fn get_one(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> AppResult<Json<DataResponse<OpportunityInfo>>> {
    let Path(id) = id?;
    Ok(DataResponse::json(state.engine.get_opportunity(id).await?))
}
