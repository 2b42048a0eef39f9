//! Error types for the completion proxy.
//!
//! Completion outcomes are never errors here: they travel as
//! [`CompletionResponse`](completion_core::CompletionResponse) values and are
//! mapped to a status code by the completion routes. `ProxyError` covers what
//! goes wrong before a request reaches the stream controller.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use completion_core::CompletionStatus;
use serde_json::json;

/// Proxy error types
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Request body could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown or malformed log filter
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] completion_core::ConfigError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Completion status reported alongside the error
    pub fn status(&self) -> CompletionStatus {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::InvalidLogLevel(_) => {
                CompletionStatus::ReqError
            }
            _ => CompletionStatus::ServerError,
        }
    }
}

impl From<JsonRejection> for ProxyError {
    fn from(rejection: JsonRejection) -> Self {
        ProxyError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidLogLevel(_) => StatusCode::BAD_REQUEST,
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Http(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "status": self.status(),
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
