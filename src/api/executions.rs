use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::response::{ApiError, ApiResult};
use crate::api::AppState;
use crate::models::execution::ListExecutionsQuery;
use crate::models::{DeliveryStatus, Execution, MessageLog, StartExecution};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct DeliveryUpdate {
    pub status: DeliveryStatus,
}

#[axum_macros::debug_handler]
pub async fn start_execution(
    State(state): State<AppState>,
    Json(payload): Json<StartExecution>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        "Start requested for sequence {} and {}",
        payload.sequence_id, payload.contact.phone
    );
    let execution = state.machine.start_execution(payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(execution)))
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(mut query): Query<ListExecutionsQuery>,
) -> ApiResult<Vec<Execution>> {
    query.limit = Some(query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT));
    let executions = state.stores().executions.list_executions(&query).await?;
    Ok(Json(executions))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Execution> {
    Ok(Json(state.machine.get_execution(id).await?))
}

pub async fn list_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<MessageLog>> {
    Ok(Json(state.machine.message_logs(id).await?))
}

pub async fn update_delivery_status(
    State(state): State<AppState>,
    Path((id, step_order)): Path<(Uuid, i32)>,
    Json(payload): Json<DeliveryUpdate>,
) -> Result<StatusCode, ApiError> {
    state
        .machine
        .update_delivery_status(id, step_order, payload.status)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Execution> {
    Ok(Json(state.machine.cancel(id, Utc::now()).await?))
}

pub async fn convert_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Execution> {
    Ok(Json(state.machine.mark_converted(id, Utc::now()).await?))
}

pub async fn pause_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Execution> {
    Ok(Json(state.machine.pause(id).await?))
}

pub async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Execution> {
    Ok(Json(state.machine.resume(id).await?))
}
