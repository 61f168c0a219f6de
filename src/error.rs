// Error handling module
// Errors surfaced by tool handlers and REST routes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;

/// Errors that can occur while serving a tool call or REST request
#[derive(Error, Debug)]
pub enum ApiError {
    /// Vendor rejected our credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Missing or unusable credentials/configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error response from the Fleet API
    #[error("Tesla API error: {status} - {message}")]
    TeslaApi { status: u16, message: String },

    /// Token endpoint could not be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Configuration(msg) => ApiError::Config(msg),
            AuthError::Authentication(msg) => ApiError::Auth(msg),
            AuthError::TransientNetwork(msg) => ApiError::Unavailable(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Auth(msg) => (StatusCode::UNAUTHORIZED, "auth_error", msg),
            ApiError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            ApiError::TeslaApi { status, message } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status_code, "tesla_api_error", message)
            }
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiError::Auth("Invalid token".to_string());
        assert_eq!(err.to_string(), "Authentication failed: Invalid token");

        let err = ApiError::TeslaApi {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "Tesla API error: 429 - Rate limit exceeded");

        let err = ApiError::Validation("vehicle_id must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: vehicle_id must not be empty"
        );
    }

    #[test]
    fn test_from_auth_error() {
        let err: ApiError = AuthError::Configuration("no credentials".to_string()).into();
        assert!(matches!(err, ApiError::Config(_)));

        let err: ApiError = AuthError::Authentication("invalid_grant".to_string()).into();
        assert!(matches!(err, ApiError::Auth(_)));

        let err: ApiError = AuthError::TransientNetwork("timeout".to_string()).into();
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_error_response_conversion() {
        let cases = vec![
            (ApiError::Auth("x".to_string()), StatusCode::UNAUTHORIZED),
            (ApiError::Config("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Unavailable("x".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Validation("x".to_string()), StatusCode::BAD_REQUEST),
            (
                ApiError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::TeslaApi {
                    status: 408,
                    message: "vehicle unavailable".to_string(),
                },
                StatusCode::REQUEST_TIMEOUT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_tesla_api_error_invalid_status() {
        let err = ApiError::TeslaApi {
            status: 1000,
            message: "Unknown error".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let err = ApiError::Internal(anyhow::anyhow!("secret detail"));
        let response = err.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "Internal server error");
        assert_eq!(json["error"]["type"], "internal_error");
    }
}
