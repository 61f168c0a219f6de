use axum::{
    extract::{Path, Query, State},
    middleware::{self as axum_middleware},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::api::FleetApi;
use crate::auth::TokenManager;
use crate::error::ApiError;
use crate::middleware;
use crate::models::{CommandRequest, HistoryQuery, SystemSummary, TelemetryQuery};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api: FleetApi,
    pub token_manager: TokenManager,

    /// Key clients must present; `None` leaves the gateway open
    pub api_key: Option<String>,
}

/// Build the REST gateway with all routes and middleware
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes(state.clone()))
        .merge(fleet_routes(state))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Health check routes (no authentication required)
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Vehicle and energy site routes
pub fn fleet_routes(state: AppState) -> Router {
    Router::new()
        .route("/vehicles", get(list_vehicles_handler))
        .route("/vehicles/:vehicle_id", get(get_vehicle_handler))
        .route("/vehicles/:vehicle_id/commands", post(vehicle_command_handler))
        .route("/solar", get(list_solar_handler))
        .route("/solar/:site_id", get(get_solar_handler))
        .route("/solar/:site_id/commands", post(solar_command_handler))
        .route("/solar/:site_id/history", get(solar_history_handler))
        .route("/solar/:site_id/telemetry", get(solar_telemetry_handler))
        .route("/summary", get(summary_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Tesla MCP gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Health check with token cache status
///
/// Reports whether a fresh access token is cached; never triggers a refresh.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION,
        "token_cached": state.token_manager.has_valid_token().await
    }))
}

async fn list_vehicles_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    tracing::info!("Request to /vehicles");
    let vehicles = state.api.list_vehicles().await?;
    Ok(Json(Value::Array(vehicles)))
}

async fn get_vehicle_handler(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    tracing::info!("Request to /vehicles/{}", vehicle_id);
    Ok(Json(state.api.get_vehicle(&vehicle_id).await?))
}

async fn vehicle_command_handler(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .api
        .send_vehicle_command(&vehicle_id, &request.command, &request.body())
        .await?;
    Ok(Json(result))
}

async fn list_solar_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    tracing::info!("Request to /solar");
    let sites = state.api.list_solar_systems().await?;
    Ok(Json(Value::Array(sites)))
}

async fn get_solar_handler(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.api.get_solar_status(&site_id).await?))
}

async fn solar_command_handler(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .api
        .send_solar_command(&site_id, &request.command, &request.body())
        .await?;
    Ok(Json(result))
}

async fn solar_history_handler(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let history = state
        .api
        .get_solar_history(&site_id, query.period.as_deref())
        .await?;
    Ok(Json(history))
}

async fn solar_telemetry_handler(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Query(query): Query<TelemetryQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.api.get_solar_telemetry(&site_id, &query).await?))
}

async fn summary_handler(State(state): State<AppState>) -> Result<Json<SystemSummary>, ApiError> {
    tracing::info!("Request to /summary");
    Ok(Json(state.api.get_system_summary().await?))
}
