//! Shared helpers for scheduling tests: a scriptable downstream model.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use completion_core::{
    CompletionParameter, CompletionPerformance, Llm, LlmCompletion, LlmError, LlmUsage,
    ModelConfig,
};
use parking_lot::Mutex;

/// What the mock answers with
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echo `completion:<id>` as the completion text
    Echo,
    Text(String),
    Fail(LlmError),
    Panic,
}

/// Downstream model that sleeps, records calls and tracks its own concurrency
pub struct MockLlm {
    cfg: ModelConfig,
    delay: Duration,
    delays: Mutex<HashMap<String, Duration>>,
    reply: Mutex<Reply>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockLlm {
    pub fn new(cfg: ModelConfig, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            delay,
            delays: Mutex::new(HashMap::new()),
            reply: Mutex::new(Reply::Echo),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn named(name: &str, max_concurrent: usize, delay_ms: u64) -> Arc<Self> {
        Self::new(ModelConfig::new(name, max_concurrent), Duration::from_millis(delay_ms))
    }

    /// Override the delay for one completion id
    pub fn delay_for(&self, completion_id: &str, delay: Duration) {
        self.delays.lock().insert(completion_id.to_string(), delay);
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    /// Completion ids that reached the model, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn completions(&self, para: &CompletionParameter) -> Result<LlmCompletion, LlmError> {
        self.calls.lock().push(para.completion_id.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let delay = self
            .delays
            .lock()
            .get(&para.completion_id)
            .copied()
            .unwrap_or(self.delay);
        tokio::time::sleep(delay).await;

        let reply = self.reply.lock().clone();
        let usage = LlmUsage { prompt_tokens: 12, completion_tokens: 3 };
        match reply {
            Reply::Echo => Ok(LlmCompletion {
                text: format!("completion:{}", para.completion_id),
                usage,
                verbose: None,
            }),
            Reply::Text(text) => Ok(LlmCompletion { text, usage, verbose: None }),
            Reply::Fail(err) => Err(err),
            Reply::Panic => panic!("mock model exploded"),
        }
    }

    fn config(&self) -> &ModelConfig {
        &self.cfg
    }
}

pub fn para(client_id: &str, completion_id: &str, model: &str) -> CompletionParameter {
    CompletionParameter {
        client_id: client_id.to_string(),
        completion_id: completion_id.to_string(),
        model: model.to_string(),
        prefix: "fn main() {\n    let x".to_string(),
        ..Default::default()
    }
}

pub fn perf() -> CompletionPerformance {
    CompletionPerformance::new()
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
