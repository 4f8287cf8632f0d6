// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::tenancy::TenancyError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidSchema(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidSchema(_) => 400,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::InvalidSchema(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidSchema(_) => "INVALID_SCHEMA",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<TenancyError> for ApiError {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::MissingSchema => ApiError::bad_request(err.to_string()),
            TenancyError::InvalidSchema { .. } => ApiError::InvalidSchema(err.to_string()),
            TenancyError::AcquireTimeout { .. } | TenancyError::DeadlineExceeded { .. } => {
                tracing::warn!("Request rejected: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            TenancyError::PoolClosed(_) | TenancyError::Connect { .. } => {
                tracing::error!("Database connection error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            TenancyError::NoContext => {
                // Route was wired without the schema resolver
                tracing::error!("{}", err);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            TenancyError::Operation(msg) => ApiError::bad_request(msg),
            TenancyError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            TenancyError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::{SchemaName, SchemaRejection};

    #[test]
    fn client_errors_map_to_400() {
        let missing: ApiError = TenancyError::MissingSchema.into();
        assert_eq!(missing.status_code(), 400);
        assert_eq!(missing.error_code(), "BAD_REQUEST");

        let invalid: ApiError = TenancyError::invalid_schema("pg_catalog", SchemaRejection::ReservedPrefix("pg_")).into();
        assert_eq!(invalid.status_code(), 400);
        assert_eq!(invalid.to_json()["code"], "INVALID_SCHEMA");
    }

    #[test]
    fn exhaustion_maps_to_503_and_hides_details() {
        let err: ApiError = TenancyError::AcquireTimeout {
            schema: SchemaName::parse("tenant_busy1").unwrap(),
            waited_ms: 15_000,
        }
        .into();
        assert_eq!(err.status_code(), 503);
        assert!(!err.message().contains("tenant_busy1"));
    }

    #[test]
    fn missing_context_is_a_server_error() {
        let err: ApiError = TenancyError::NoContext.into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_json()["error"], true);
    }
}
