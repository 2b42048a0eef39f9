//! Shared helpers for HTTP tests: a canned downstream model and a router
//! built around it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use completion_core::{
    CompletionParameter, GatewayConfig, Llm, LlmCompletion, LlmError, LlmUsage, ModelConfig,
    PoolManager, StreamController, StreamControllerConfig,
};
use completion_proxy::{build_router, AppState};
use serde_json::Value;
use tower::ServiceExt;

/// Downstream model answering after a fixed delay
pub struct CannedLlm {
    cfg: ModelConfig,
    delay: Duration,
    text: Option<String>,
}

impl CannedLlm {
    /// Echoes the prefix back as the completion
    pub fn echo(cfg: ModelConfig, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self { cfg, delay: Duration::from_millis(delay_ms), text: None })
    }

    pub fn text(cfg: ModelConfig, text: &str) -> Arc<Self> {
        Arc::new(Self { cfg, delay: Duration::ZERO, text: Some(text.to_string()) })
    }
}

#[async_trait]
impl Llm for CannedLlm {
    async fn completions(&self, para: &CompletionParameter) -> Result<LlmCompletion, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok(LlmCompletion {
            text: self.text.clone().unwrap_or_else(|| format!("<{}>", para.prefix)),
            usage: LlmUsage { prompt_tokens: 8, completion_tokens: 2 },
            verbose: None,
        })
    }

    fn config(&self) -> &ModelConfig {
        &self.cfg
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn app(llms: Vec<Arc<CannedLlm>>) -> TestApp {
    let models: Vec<ModelConfig> = llms.iter().map(|llm| llm.config().clone()).collect();
    let pools = PoolManager::from_models(llms.into_iter().map(|m| m as Arc<dyn Llm>)).unwrap();
    let sc = StreamControllerConfig { completion_timeout_ms: 2_000, ..Default::default() };
    let controller = Arc::new(StreamController::new(sc.clone(), pools));
    let config = GatewayConfig { models, stream_controller: sc, ..Default::default() };

    let state = Arc::new(AppState::new(config, controller));
    TestApp { router: build_router(Arc::clone(&state)), state }
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

pub async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, text) = post_raw(router, uri, &body.to_string()).await;
    let json = if text.is_empty() { Value::Null } else { serde_json::from_str(&text).unwrap() };
    (status, json)
}

pub async fn post_raw(router: &Router, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Poll `cond` every 5ms until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
