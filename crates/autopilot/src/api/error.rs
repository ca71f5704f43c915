//! Structured HTTP errors

use autopilot_lib::error::{ClusterError, SchedulerError, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The orchestrator or a peer failed the request
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ApiError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(code, error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            ClusterError::Timeout { .. } => ApiError::Timeout(err.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ApiError::Conflict(err.to_string()),
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Registration(e) => ApiError::Validation(e.to_string()),
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Cluster(e) => e.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_lib::error::RegistrationError;

    #[test]
    fn test_error_mapping() {
        let conflict: ApiError = SchedulerError::Store(StoreError::Conflict("app web".into())).into();
        assert_eq!(conflict.status_and_code().0, StatusCode::CONFLICT);

        let invalid: ApiError = SchedulerError::Registration(RegistrationError::EmptyPorts).into();
        assert_eq!(invalid.status_and_code(), (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"));

        let missing: ApiError = ClusterError::not_found("Deployment", "shop/web").into();
        assert_eq!(missing.status_and_code().0, StatusCode::NOT_FOUND);

        let failed: ApiError = ClusterError::Api("patch rejected".into()).into();
        assert_eq!(failed.status_and_code().0, StatusCode::BAD_GATEWAY);
    }
}
