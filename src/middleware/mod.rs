// Authentication and CORS middleware

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;
use crate::routes::AppState;

/// API key middleware
///
/// Accepts "Authorization: Bearer {SERVER_API_KEY}" or the bare key in x-api-key.
/// Without a configured key every request passes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    if bearer == Some(expected) || api_key == Some(expected) {
        return Ok(next.run(request).await);
    }

    let request_id = uuid::Uuid::new_v4().simple().to_string();
    tracing::warn!(
        "[{}] Access attempt with invalid or missing API key: {} {}",
        &request_id[..8],
        request.method(),
        request.uri().path()
    );
    Err(ApiError::Auth("Invalid or missing API Key".to_string()))
}

/// Allow all origins, methods, and headers
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
