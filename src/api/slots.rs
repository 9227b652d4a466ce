use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::NewSlot;
use crate::model::{DateCapacityRecord, DateRange, SlotSummary, TimeSlot};

use super::{AppError, AppResult, AppState, DataResponse};

/// Inclusive `[start, end]`, or a 400 when reversed.
pub(super) fn date_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, AppError> {
    DateRange::new(start, end)
        .ok_or_else(|| AppError::BadRequest(format!("end date {end} is before start date {start}")))
}

#[derive(Debug, Deserialize)]
pub struct OpenSlot {
    pub id: Option<Ulid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub default_capacity: u32,
    #[serde(default)]
    pub minimum_stay: u32,
}

pub async fn open(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<OpenSlot>, JsonRejection>,
) -> AppResult<(StatusCode, Json<DataResponse<TimeSlot>>)> {
    let Path(opportunity_id) = id?;
    let Json(body) = body?;
    let slot = state
        .engine
        .open_slot(NewSlot {
            id: body.id.unwrap_or_else(Ulid::new),
            opportunity_id,
            range: date_range(body.start_date, body.end_date)?,
            default_capacity: body.default_capacity,
            minimum_stay: body.minimum_stay,
        })
        .await?;
    Ok((StatusCode::CREATED, DataResponse::json(slot)))
}

pub async fn list(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> AppResult<Json<DataResponse<Vec<SlotSummary>>>> {
    let Path(opportunity_id) = id?;
    Ok(DataResponse::json(state.engine.list_slots(opportunity_id).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> AppResult<Json<DataResponse<TimeSlot>>> {
    let Path((opportunity_id, slot_id)) = ids?;
    Ok(DataResponse::json(state.engine.get_slot(opportunity_id, slot_id).await?))
}

pub async fn close(
    State(state): State<AppState>,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> AppResult<Json<DataResponse<TimeSlot>>> {
    let Path((opportunity_id, slot_id)) = ids?;
    Ok(DataResponse::json(state.engine.close_slot(opportunity_id, slot_id).await?))
}

pub async fn reopen(
    State(state): State<AppState>,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> AppResult<Json<DataResponse<TimeSlot>>> {
    let Path((opportunity_id, slot_id)) = ids?;
    Ok(DataResponse::json(state.engine.reopen_slot(opportunity_id, slot_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CapacityWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub async fn capacity(
    State(state): State<AppState>,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
    window: Result<Query<CapacityWindow>, QueryRejection>,
) -> AppResult<Json<DataResponse<Vec<DateCapacityRecord>>>> {
    let Path((opportunity_id, slot_id)) = ids?;
    let Query(window) = window?;
    let records = state
        .engine
        .capacity_records(opportunity_id, slot_id, date_range(window.start, window.end)?)
        .await?;
    Ok(DataResponse::json(records))
}

#[derive(Debug, Deserialize)]
pub struct EnsureRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Defaults to the slot's default capacity.
    pub capacity: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EnsureRangeResult {
    pub created: u32,
}

pub async fn ensure_range(
    State(state): State<AppState>,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Result<Json<EnsureRange>, JsonRejection>,
) -> AppResult<Json<DataResponse<EnsureRangeResult>>> {
    let Path((opportunity_id, slot_id)) = ids?;
    let Json(body) = body?;
    let capacity = match body.capacity {
        Some(c) => c,
        None => {
            state
                .engine
                .get_slot(opportunity_id, slot_id)
                .await?
                .default_capacity
        }
    };
    let created = state
        .engine
        .ensure_range(
            opportunity_id,
            slot_id,
            date_range(body.start_date, body.end_date)?,
            capacity,
        )
        .await?;
    Ok(DataResponse::json(EnsureRangeResult { created }))
}

#[derive(Debug, Deserialize)]
pub struct SetDayCapacity {
    pub capacity: u32,
}

pub async fn set_day_capacity(
    State(state): State<AppState>,
    ids: Result<Path<(Ulid, Ulid, NaiveDate)>, PathRejection>,
    body: Result<Json<SetDayCapacity>, JsonRejection>,
) -> AppResult<Json<DataResponse<DateCapacityRecord>>> {
    let Path((opportunity_id, slot_id, date)) = ids?;
    let Json(body) = body?;
    let record = state
        .engine
        .set_day_capacity(opportunity_id, slot_id, date, body.capacity)
        .await?;
    Ok(DataResponse::json(record))
}
