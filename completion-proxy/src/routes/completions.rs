//! Completion routes.
//!
//! Three wire protocols share the stream controller:
//! - v1: editor plugin requests, adapted to the selected model before scheduling
//! - v2: a ready-made [`CompletionParameter`], scheduled as is
//! - OpenAI: anonymous callers, no per-client single-flight
//!
//! Every outcome is returned as a [`CompletionResponse`] body; the HTTP status
//! reflects its [`CompletionStatus`].

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use completion_core::{CompletionParameter, CompletionPerformance, CompletionResponse, CompletionStatus};
use tracing::debug;

use crate::convert;
use crate::error::ProxyError;
use crate::state::AppState;
use crate::types::{openai, v1};

/// Plugin completion with per-model prompt adaptation
///
/// POST /code-completion/api/v1/completions
pub async fn completions_v1(
    State(state): State<Arc<AppState>>,
    body: Result<Json<v1::CompletionInput>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let perf = CompletionPerformance::new();
    let Json(input) = body?;
    debug!(
        client_id = %input.client_id,
        completion_id = %input.completion_id,
        trigger_mode = %input.trigger_mode,
        "Received v1 completion"
    );

    let para = convert::v1_to_parameter(&input);
    let ctx = state.controller.context();
    let rsp = state
        .controller
        .process_preselected(&ctx, para, perf, convert::adapt_to_model)
        .await;
    Ok(completion_reply(rsp))
}

/// Completion with a prepared parameter
///
/// POST /code-completion/api/v2/completions
pub async fn completions_v2(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CompletionParameter>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let perf = CompletionPerformance::new();
    let Json(para) = body?;
    debug!(
        client_id = %para.client_id,
        completion_id = %para.completion_id,
        "Received v2 completion"
    );

    let ctx = state.controller.context();
    let rsp = state.controller.process_completion(&ctx, para, perf).await;
    Ok(completion_reply(rsp))
}

/// OpenAI-compatible completion
///
/// POST /api/completions
pub async fn completions_openai(
    State(state): State<Arc<AppState>>,
    body: Result<Json<openai::CompletionsRequest>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let perf = CompletionPerformance::new();
    let Json(request) = body?;
    if request.stream {
        return Err(ProxyError::InvalidRequest("streaming is not supported".to_string()));
    }

    let para = convert::openai_to_parameter(&request);
    let ctx = state.controller.context();
    let rsp = state.controller.process_openai(&ctx, para, perf).await;
    Ok(completion_reply(rsp))
}

/// HTTP status for a completion outcome
pub fn status_code(status: CompletionStatus) -> StatusCode {
    match status {
        CompletionStatus::Success => StatusCode::OK,
        CompletionStatus::Empty => StatusCode::NO_CONTENT,
        CompletionStatus::Canceled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
        }
        CompletionStatus::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CompletionStatus::Busy => StatusCode::TOO_MANY_REQUESTS,
        CompletionStatus::ReqError | CompletionStatus::Rejected => StatusCode::BAD_REQUEST,
        CompletionStatus::ServerError | CompletionStatus::ModelError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Serialize an outcome with its status code
pub fn completion_reply(rsp: CompletionResponse) -> Response {
    (status_code(rsp.status), Json(rsp)).into_response()
}
