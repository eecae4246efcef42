use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::response::{ApiError, ApiResult};
use crate::api::AppState;
use crate::error::FollowUpError;
use crate::models::step::build_steps;
use crate::models::{CreateSequence, Sequence, SequenceStats, SequenceStep, UpdateSequence};

#[derive(Debug, Deserialize)]
pub struct OrganizationQuery {
    pub organization_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SequenceWithSteps {
    #[serde(flatten)]
    pub sequence: Sequence,
    pub steps: Vec<SequenceStep>,
}

pub async fn create_sequence(
    State(state): State<AppState>,
    Json(payload): Json<CreateSequence>,
) -> Result<impl IntoResponse, ApiError> {
    let sequence = Sequence::new(&payload)?;
    let steps = build_steps(sequence.id, &payload.steps)?;

    state
        .stores()
        .sequences
        .create_sequence(&sequence, &steps)
        .await?;

    info!(
        "Created sequence {} ({}) with {} steps",
        sequence.id,
        sequence.name,
        steps.len()
    );

    Ok((StatusCode::CREATED, Json(SequenceWithSteps { sequence, steps })))
}

pub async fn list_sequences(
    State(state): State<AppState>,
    Query(query): Query<OrganizationQuery>,
) -> ApiResult<Vec<Sequence>> {
    let sequences = state
        .stores()
        .sequences
        .list_sequences(query.organization_id)
        .await?;
    Ok(Json(sequences))
}

pub async fn get_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SequenceWithSteps> {
    let store = &state.stores().sequences;
    let sequence = store
        .find_sequence(id)
        .await?
        .ok_or_else(|| FollowUpError::not_found("Sequence", id))?;
    let steps = store.list_steps(id).await?;

    Ok(Json(SequenceWithSteps { sequence, steps }))
}

pub async fn update_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSequence>,
) -> ApiResult<SequenceWithSteps> {
    let store = &state.stores().sequences;
    let mut sequence = store
        .find_sequence(id)
        .await?
        .ok_or_else(|| FollowUpError::not_found("Sequence", id))?;

    sequence.apply(&payload)?;
    let replacement = payload
        .steps
        .as_deref()
        .map(|steps| build_steps(id, steps))
        .transpose()?;

    if !store.update_sequence(&sequence, replacement.as_deref()).await? {
        return Err(FollowUpError::not_found("Sequence", id).into());
    }

    info!("Updated sequence {} ({})", sequence.id, sequence.name);

    let steps = store.list_steps(id).await?;
    Ok(Json(SequenceWithSteps { sequence, steps }))
}

pub async fn delete_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.stores().sequences.delete_sequence(id).await? {
        info!("Deleted sequence {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(FollowUpError::not_found("Sequence", id).into())
    }
}

pub async fn sequence_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SequenceStats> {
    Ok(Json(state.stats.sequence_stats(id).await?))
}

pub async fn organization_stats(
    State(state): State<AppState>,
    Query(query): Query<OrganizationQuery>,
) -> ApiResult<Vec<SequenceStats>> {
    Ok(Json(state.stats.organization_stats(query.organization_id).await?))
}
