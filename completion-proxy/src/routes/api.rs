//! Stream controller introspection and runtime log control.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use crate::error::ProxyError;
use crate::logging;
use crate::state::AppState;
use crate::types::LogSettings;

/// Aggregate queue and pool counters
///
/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "message": "OK",
        "data": state.controller.stats(),
    }))
}

/// Registered requests, clients and running requests per pool
///
/// GET /api/details
pub async fn details(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "message": "OK",
        "data": state.controller.details(),
    }))
}

/// Replace the active log filter
///
/// POST /api/logs
pub async fn set_log_level(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LogSettings>, JsonRejection>,
) -> Result<impl IntoResponse, ProxyError> {
    let Json(settings) = body?;
    let handle = state
        .log_handle()
        .ok_or_else(|| ProxyError::Internal("log level is not adjustable".to_string()))?;

    logging::set_level(handle, &settings.level)?;
    info!(level = %settings.level, "Log level changed");

    Ok(Json(json!({
        "status": "ok",
        "level": settings.level,
    })))
}
