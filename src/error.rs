//! Handler error type. Every failure is rendered as
//! `{"status": "error", "message": ...}` with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Logged with full detail, reported to the caller as a generic failure
    #[error("Failed to {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error body shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

impl ApiError {
    pub fn project_not_found() -> Self {
        ApiError::NotFound("Project not found".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Store(StoreError::NotFound { entity, .. }) => format!("{} not found", entity),
            ApiError::Store(StoreError::Conflict(_)) => "Resource already exists".to_string(),
            ApiError::Store(StoreError::Backend(_)) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        (status, Json(ErrorResponse::new(self.user_message()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_404_with_entity_message() {
        let err = ApiError::from(StoreError::NotFound {
            entity: "Component",
            id: "4".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.user_message(), "Component not found");
    }

    #[test]
    fn test_backend_error_detail_is_not_leaked() {
        let err = ApiError::from(StoreError::Backend("connection refused".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("refused"));
    }

    #[test]
    fn test_error_response_shape() {
        let body = serde_json::to_value(ErrorResponse::new("Project not found")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"status": "error", "message": "Project not found"})
        );
    }
}
