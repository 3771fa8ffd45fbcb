use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Seconds advertised in the `Retry-After` header on rate-limited responses.
const RATE_LIMIT_RETRY_AFTER: &str = "5";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    Unprocessable(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PipelineError::Config(msg.into())
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        PipelineError::BadRequest(msg.into())
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        PipelineError::Unauthorized(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        PipelineError::NotFound(msg.into())
    }

    pub fn rate_limited<S: Into<String>>(msg: S) -> Self {
        PipelineError::RateLimited(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PipelineError::Internal(msg.into())
    }

    pub fn service_unavailable<S: Into<String>>(msg: S) -> Self {
        PipelineError::ServiceUnavailable(msg.into())
    }

    /// Stable machine-readable error kind, surfaced in the `errors` field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::BadRequest(_) | PipelineError::Serialization(_) => "bad-request",
            PipelineError::Unauthorized(_) => "unauthorized-request",
            PipelineError::NotFound(_) => "resource-not-found",
            PipelineError::Conflict(_) => "duplicate-entity",
            PipelineError::Unprocessable(_) => "integrity-error",
            PipelineError::RateLimited(_) => "rate-limited",
            PipelineError::ServiceUnavailable(_) | PipelineError::Broker(_) => {
                "service-unavailable"
            }
            PipelineError::Config(_)
            | PipelineError::Internal(_)
            | PipelineError::Database(_) => "server-error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            "bad-request" => StatusCode::BAD_REQUEST,
            "unauthorized-request" => StatusCode::UNAUTHORIZED,
            "resource-not-found" => StatusCode::NOT_FOUND,
            "duplicate-entity" => StatusCode::CONFLICT,
            "integrity-error" => StatusCode::UNPROCESSABLE_ENTITY,
            "rate-limited" => StatusCode::TOO_MANY_REQUESTS,
            "service-unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs, not in the client payload.
        let message = match &self {
            PipelineError::Database(e) => {
                tracing::error!(error = %e, "database operation failed");
                "Database operation failed".to_string()
            }
            PipelineError::Broker(e) => {
                tracing::error!(error = %e, "broker operation failed");
                "Broker temporarily unavailable".to_string()
            }
            PipelineError::Config(msg) | PipelineError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                "An unexpected error occurred".to_string()
            }
            PipelineError::BadRequest(msg)
            | PipelineError::Unauthorized(msg)
            | PipelineError::NotFound(msg)
            | PipelineError::Conflict(msg)
            | PipelineError::Unprocessable(msg)
            | PipelineError::RateLimited(msg)
            | PipelineError::ServiceUnavailable(msg) => msg.clone(),
            PipelineError::Serialization(e) => format!("Invalid JSON payload: {e}"),
        };

        let body = Json(json!({
            "code": status.as_u16(),
            "message": message,
            "errors": self.kind(),
        }));

        let mut response = (status, body).into_response();
        if matches!(self, PipelineError::RateLimited(_)) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                header::HeaderValue::from_static(RATE_LIMIT_RETRY_AFTER),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_status_codes() {
        assert_eq!(
            PipelineError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::unauthorized("x").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PipelineError::rate_limited("x").status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            PipelineError::service_unavailable("x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PipelineError::internal("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = PipelineError::rate_limited("slow down").into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            RATE_LIMIT_RETRY_AFTER
        );
    }

    #[test]
    fn idempotency_conflict_reports_bad_request_kind() {
        let err = PipelineError::bad_request("Idempotency key reused with different payload!");
        assert_eq!(err.kind(), "bad-request");
    }
}
