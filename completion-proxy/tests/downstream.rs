//! OpenAI-compatible client against a local stub model server.

use std::net::SocketAddr;

use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use completion_core::{CompletionParameter, Llm, LlmErrorKind, ModelConfig};
use completion_proxy::OpenAiModel;
use serde_json::{json, Value};

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({
        "id": "cmpl-stub",
        "object": "text_completion",
        "model": body["model"],
        "choices": [{"text": format!("{}|{}", body["prompt"].as_str().unwrap_or_default(), auth), "index": 0}],
        "usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}
    }))
}

async fn overloaded() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "overloaded"})))
}

async fn serve_stub() -> SocketAddr {
    let app = Router::new()
        .route("/v1/completions", post(completions))
        .route("/overloaded/v1/completions", post(overloaded));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn model_config(url: String) -> ModelConfig {
    ModelConfig {
        model_title: "stub".to_string(),
        completions_url: url,
        authorization: "Bearer secret".to_string(),
        timeout_ms: 2_000,
        fim_mode: true,
        fim_begin: "<B>".to_string(),
        fim_hole: "<H>".to_string(),
        fim_end: "<E>".to_string(),
        ..ModelConfig::new("stub-coder", 1)
    }
}

#[tokio::test]
async fn test_completion_round_trip() {
    let addr = serve_stub().await;
    let model = OpenAiModel::new(model_config(format!("http://{addr}/v1/completions"))).unwrap();

    let para = CompletionParameter {
        prefix: "a".to_string(),
        suffix: "b".to_string(),
        verbose: true,
        ..Default::default()
    };
    let completion = model.completions(&para).await.unwrap();

    assert_eq!(completion.text, "<B>\na<H>b<E>|Bearer secret");
    assert_eq!(completion.usage.prompt_tokens, 7);
    assert_eq!(completion.usage.completion_tokens, 3);

    let verbose = completion.verbose.unwrap();
    assert_eq!(verbose.id, "stub");
    assert_eq!(verbose.input["model"], "stub-coder");
    assert_eq!(verbose.output.unwrap()["id"], "cmpl-stub");
}

#[tokio::test]
async fn test_error_status_is_model_error() {
    let addr = serve_stub().await;
    let model =
        OpenAiModel::new(model_config(format!("http://{addr}/overloaded/v1/completions"))).unwrap();

    let err = model.completions(&CompletionParameter::default()).await.unwrap_err();
    assert_eq!(err.kind, LlmErrorKind::Model);
    assert_eq!(err.message, "Invalid StatusCode(503)");
    assert!(err.verbose.is_none());
}

#[tokio::test]
async fn test_unreachable_model_is_server_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let model = OpenAiModel::new(model_config(format!("http://{addr}/v1/completions"))).unwrap();
    let err = model.completions(&CompletionParameter::default()).await.unwrap_err();
    assert_eq!(err.kind, LlmErrorKind::Server);
}
