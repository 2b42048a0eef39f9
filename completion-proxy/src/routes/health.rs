//! Health check and metrics endpoints.

use axum::{http::header, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

/// Liveness probe
///
/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

/// Prometheus metrics in text exposition format
///
/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        completion_core::metrics::encode_metrics(),
    )
}
