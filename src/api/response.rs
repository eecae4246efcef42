use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::FollowUpError;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        Self {
            status,
            message: status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        }
    }
}

impl From<FollowUpError> for ApiError {
    fn from(err: FollowUpError) -> Self {
        let status = match &err {
            FollowUpError::NotFound { .. } => StatusCode::NOT_FOUND,
            FollowUpError::Validation(_) => StatusCode::BAD_REQUEST,
            FollowUpError::InvalidState(_) => StatusCode::CONFLICT,
            FollowUpError::Dispatch(_) => StatusCode::BAD_GATEWAY,
            FollowUpError::Database(_) | FollowUpError::Serialization(_) => {
                error!("Request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        Self {
            status,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (FollowUpError::not_found("Sequence", "x"), StatusCode::NOT_FOUND),
            (FollowUpError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (FollowUpError::InvalidState("done".into()), StatusCode::CONFLICT),
            (FollowUpError::Dispatch("down".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
