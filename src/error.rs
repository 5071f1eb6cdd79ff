//! # Error Handling
//!
//! Unified error handling for the datawatch API: a consistent
//! problem+json response shape with SCREAMING_SNAKE_CASE error codes.
//!
//! Boundary errors (validation, auth, not-found, conflict) surface to HTTP
//! here; per-job errors are contained by the orchestrator and recorded on
//! the job row instead.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Suggested retry delay in seconds (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// Create a new API error with the given status code, code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Create a validation error (400) with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
        .with_details(field_errors)
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        message.unwrap_or("Authentication required"),
    )
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::FORBIDDEN,
        "FORBIDDEN",
        message.unwrap_or("Insufficient permissions"),
    )
}

/// Create a not-found error (404) for an entity
pub fn not_found(entity: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "NOT_FOUND".to_string(),
        format!("{} '{}' not found", entity, id),
    )
}

/// Create a conflict error (409)
pub fn conflict(message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
}

/// Create an upstream error (502) for target-database or worker failures
pub fn upstream_error(source: &str, message: &str) -> ApiError {
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "UPSTREAM_ERROR".to_string(),
        format!("{}: {}", source, message),
    )
    .with_details(json!({ "source": source }))
}

/// Map a database error to an internal API error, logging the cause
pub fn storage_error(context: &'static str, err: sea_orm::DbErr) -> ApiError {
    tracing::error!(error = ?err, context, "Database operation failed");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_SERVER_ERROR",
        context,
    )
}

/// Errors raised by background task execution; captured per job and never
/// propagated across the orchestrator boundary.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("connection {0} not found")]
    ConnectionNotFound(uuid::Uuid),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("job cancelled")]
    Cancelled,
}

impl From<sea_orm::DbErr> for TaskError {
    fn from(err: sea_orm::DbErr) -> Self {
        TaskError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "Internal error");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(what) => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND".to_string(),
                format!("Record not found: {}", what),
            ),
            other => storage_error("database operation failed", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_error_basic() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test message");

        assert_eq!(error.code, "VALIDATION_FAILED");
        assert_eq!(error.message, "Test message");
        assert!(error.details.is_none());
        assert!(error.retry_after.is_none());
    }

    #[test]
    fn api_error_with_details() {
        let error = validation_error("Validation failed", json!({"time": "must match HH:MM"}));

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(json!({"time": "must match HH:MM"})));
    }

    #[test]
    fn content_type_and_status_preserved() {
        let error = conflict("job already running");
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn retry_after_header() {
        let error = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Rate limit exceeded",
        )
        .with_retry_after(60);

        let response = error.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    }

    #[test]
    fn record_not_found_maps_to_404() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("job".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, "NOT_FOUND");
    }

    #[test]
    fn upstream_error_maps_to_502() {
        let error = upstream_error("postgresql", "connection refused");
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.code, "UPSTREAM_ERROR");
        assert!(error.message.contains("postgresql"));
    }
}
