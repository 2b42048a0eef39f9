//! The scheduling unit: one client's completion call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{CompletionParameter, CompletionPerformance, CompletionResponse, CompletionStatus};

/// Receiving half of a request's single-slot result channel
pub type ResponseReceiver = oneshot::Receiver<CompletionResponse>;

/// A completion request travelling from the queue manager to a pool worker.
///
/// Shared by reference between the global registry, a pool's queue and
/// running-set, but only one of them acts on it at a time.
pub struct CompletionRequest {
    completion_id: String,
    client_id: String,
    para: RwLock<CompletionParameter>,
    perf: Mutex<CompletionPerformance>,
    canceled: AtomicBool,
    token: CancellationToken,
    deadline: Instant,
    rsp_tx: Mutex<Option<oneshot::Sender<CompletionResponse>>>,
}

impl CompletionRequest {
    /// Create a request bound to a child of `ctx` that expires after `timeout`
    pub fn new(
        ctx: &CancellationToken,
        para: CompletionParameter,
        perf: CompletionPerformance,
        timeout: Duration,
    ) -> (Arc<Self>, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let req = Arc::new(Self {
            completion_id: para.completion_id.clone(),
            client_id: para.client_id.clone(),
            para: RwLock::new(para),
            perf: Mutex::new(perf),
            canceled: AtomicBool::new(false),
            token: ctx.child_token(),
            deadline: Instant::now() + timeout,
            rsp_tx: Mutex::new(Some(tx)),
        });
        (req, rx)
    }

    pub fn completion_id(&self) -> &str {
        &self.completion_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Requested model, or the selected pool's model once resolved
    pub fn model(&self) -> String {
        self.para.read().model.clone()
    }

    /// Snapshot of the parameter for the downstream call
    pub fn parameter(&self) -> CompletionParameter {
        self.para.read().clone()
    }

    /// Replace the requested model with the concrete pool's model name
    pub(crate) fn resolve_model(&self, model: &str) {
        self.para.write().model = model.to_string();
    }

    /// Run `f` against the performance record
    pub fn with_perf<R>(&self, f: impl FnOnce(&mut CompletionPerformance) -> R) -> R {
        f(&mut self.perf.lock())
    }

    /// Cancel the request's context and flag it. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
        self.canceled.store(true, Ordering::Release);
    }

    /// Flag the request so a worker that dequeues it skips it
    pub fn mark_canceled(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire) || self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolves when the request's context is done: `Canceled` if the token
    /// was cancelled, `Timeout` once the deadline elapses.
    pub async fn done(&self) -> CompletionStatus {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => CompletionStatus::Canceled,
            _ = tokio::time::sleep_until(self.deadline) => CompletionStatus::Timeout,
        }
    }

    /// Hand the outcome to the waiter without blocking.
    ///
    /// Returns `false` when the slot was already used or the waiter is gone;
    /// the response is dropped in that case.
    pub fn deliver(&self, rsp: CompletionResponse) -> bool {
        let Some(tx) = self.rsp_tx.lock().take() else {
            return false;
        };
        tx.send(rsp).is_ok()
    }

    /// Build a non-success outcome for this request
    pub fn fail(&self, status: CompletionStatus, error: impl fmt::Display) -> CompletionResponse {
        let model = self.model();
        debug!(
            client_id = %self.client_id,
            completion_id = %self.completion_id,
            model = %model,
            status = %status,
            "Completion request failed"
        );
        let mut perf = self.perf.lock();
        CompletionResponse::failure(&self.completion_id, model, status, &mut perf, None, error)
    }

    /// Short description used in pool and client listings
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            completion_id: self.completion_id.clone(),
            client_id: self.client_id.clone(),
            prompt: self.para.read().prompt_len(),
            canceled: self.is_canceled(),
        }
    }

    /// Full description used by the details endpoint
    pub fn details(&self) -> RequestDetails {
        let para = self.para.read();
        RequestDetails {
            completion_id: self.completion_id.clone(),
            client_id: self.client_id.clone(),
            model: para.model.clone(),
            prompt: PromptDetails {
                prefix: para.prefix.len(),
                suffix: para.suffix.len(),
                context: para.code_context.len(),
                total: para.prompt_len(),
                line_prefix: para.line_prefix().to_string(),
                line_suffix: para.line_suffix().to_string(),
            },
            performance: self.perf.lock().clone(),
            canceled: self.is_canceled(),
        }
    }
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("completion_id", &self.completion_id)
            .field("client_id", &self.client_id)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub completion_id: String,
    pub client_id: String,
    pub prompt: usize,
    pub canceled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptDetails {
    pub prefix: usize,
    pub suffix: usize,
    pub context: usize,
    pub total: usize,
    pub line_prefix: String,
    pub line_suffix: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestDetails {
    pub completion_id: String,
    pub client_id: String,
    pub model: String,
    pub prompt: PromptDetails,
    pub performance: CompletionPerformance,
    pub canceled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(timeout: Duration) -> (Arc<CompletionRequest>, ResponseReceiver) {
        let para = CompletionParameter {
            completion_id: "c1".to_string(),
            client_id: "alice".to_string(),
            model: "auto".to_string(),
            prefix: "fn main() {\n    let".to_string(),
            ..Default::default()
        };
        CompletionRequest::new(&CancellationToken::new(), para, CompletionPerformance::new(), timeout)
    }

    #[tokio::test]
    async fn test_deliver_once() {
        let (req, rx) = make_request(Duration::from_secs(5));
        let rsp = req.fail(CompletionStatus::Empty, "empty");
        assert!(req.deliver(rsp.clone()));
        assert!(!req.deliver(rsp));
        assert_eq!(rx.await.unwrap().status, CompletionStatus::Empty);
    }

    #[tokio::test]
    async fn test_deliver_to_departed_waiter() {
        let (req, rx) = make_request(Duration::from_secs(5));
        drop(rx);
        assert!(!req.deliver(req.fail(CompletionStatus::Empty, "empty")));
    }

    #[tokio::test]
    async fn test_done_reports_timeout() {
        let (req, _rx) = make_request(Duration::from_millis(20));
        assert_eq!(req.done().await, CompletionStatus::Timeout);
        assert!(!req.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (req, _rx) = make_request(Duration::from_secs(5));
        req.cancel();
        req.cancel();
        assert!(req.is_canceled());
        assert_eq!(req.done().await, CompletionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (req, _rx) = CompletionRequest::new(
            &parent,
            CompletionParameter::default(),
            CompletionPerformance::new(),
            Duration::from_secs(5),
        );
        parent.cancel();
        assert!(req.is_canceled());
    }

    #[test]
    fn test_resolve_model_and_details() {
        let (req, _rx) = make_request(Duration::from_secs(5));
        req.resolve_model("deepseek");
        assert_eq!(req.model(), "deepseek");
        let details = req.details();
        assert_eq!(details.model, "deepseek");
        assert_eq!(details.prompt.line_prefix, "    let");
        assert_eq!(req.summary().prompt, req.parameter().prompt_len());
    }
}
