use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::api::response::{ApiError, ApiResult};
use crate::api::AppState;
use crate::error::FollowUpError;
use crate::models::conversation::{IdleConversationsQuery, InboundMessage, TrackConversation};
use crate::models::ConversationLink;

pub async fn track_conversation(
    State(state): State<AppState>,
    Json(payload): Json<TrackConversation>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state.tracker.track_for_follow_up(payload, Utc::now()).await?;
    Ok((StatusCode::OK, Json(link)))
}

/// Called by the inbound notifier whenever the contact writes. The body is
/// optional.
pub async fn inbound_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    payload: Option<Json<InboundMessage>>,
) -> ApiResult<Value> {
    let message = payload.map(|Json(m)| m).unwrap_or_default();
    let cancelled = state
        .tracker
        .cancel_on_response(&conversation_id, message.text.as_deref(), Utc::now())
        .await?;

    let ids: Vec<_> = cancelled.iter().map(|e| e.id).collect();
    Ok(Json(json!({
        "conversation_id": conversation_id,
        "cancelled": ids,
    })))
}

pub async fn idle_conversations(
    State(state): State<AppState>,
    Query(query): Query<IdleConversationsQuery>,
) -> ApiResult<Vec<ConversationLink>> {
    let idle_for = Duration::try_minutes(query.idle_minutes).ok_or_else(|| {
        FollowUpError::Validation(format!("idle_minutes {} is out of range", query.idle_minutes))
    })?;
    let links = state
        .tracker
        .idle_conversations(query.organization_id, idle_for, Utc::now())
        .await?;
    Ok(Json(links))
}
