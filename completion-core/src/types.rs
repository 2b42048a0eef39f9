//! Completion data model shared by every stage of the gateway.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics;

/// Terminal outcome of a completion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionStatus {
    /// Completion produced text
    Success,
    /// Malformed input, caller's fault
    ReqError,
    /// Internal failure before or after the model call
    ServerError,
    /// Downstream model answered with a non-success status
    ModelError,
    /// Model produced no content
    Empty,
    /// Refused by policy (e.g. missing identifiers)
    Rejected,
    /// Deadline elapsed
    Timeout,
    /// Superseded by a newer request from the same client, or abandoned
    Canceled,
    /// No eligible pool, or admission queue full
    Busy,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Success => "success",
            CompletionStatus::ReqError => "reqError",
            CompletionStatus::ServerError => "serverError",
            CompletionStatus::ModelError => "modelError",
            CompletionStatus::Empty => "empty",
            CompletionStatus::Rejected => "rejected",
            CompletionStatus::Timeout => "timeout",
            CompletionStatus::Canceled => "canceled",
            CompletionStatus::Busy => "busy",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CompletionStatus::Success)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters handed to the model after adaptation. Immutable for the core,
/// except for `model`, which is replaced by the selected pool's model name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionParameter {
    /// Unique identifier of this completion
    #[serde(rename = "completionID", default)]
    pub completion_id: String,

    /// Identifier of the client issuing the completion
    #[serde(rename = "clientID", default)]
    pub client_id: String,

    #[serde(default)]
    pub language: String,

    /// Requested model name or tag
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default)]
    pub stop: Vec<String>,

    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub suffix: String,

    #[serde(rename = "context", default)]
    pub code_context: String,

    /// Attach the downstream request/response to the reply
    #[serde(default)]
    pub verbose: bool,
}

impl CompletionParameter {
    /// Total prompt length in bytes
    pub fn prompt_len(&self) -> usize {
        self.prefix.len() + self.suffix.len() + self.code_context.len()
    }

    /// Last line of the prefix (text left of the cursor)
    pub fn line_prefix(&self) -> &str {
        self.prefix.rsplit('\n').next().unwrap_or_default()
    }

    /// First line of the suffix (text right of the cursor), keeping its newline
    pub fn line_suffix(&self) -> &str {
        match self.suffix.find('\n') {
            Some(pos) => &self.suffix[..=pos],
            None => &self.suffix,
        }
    }
}

/// Timing record of one request. Written stage by stage, never concurrently.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPerformance {
    /// Wall-clock time the request was received
    pub receive_time: DateTime<Utc>,

    #[serde(skip)]
    pub received_at: Instant,

    /// Set when the request is registered for scheduling
    #[serde(skip)]
    pub enqueued_at: Option<Instant>,

    /// Milliseconds spent gathering context
    pub context_duration: u64,

    /// Milliseconds spent waiting for a worker
    pub queue_duration: u64,

    /// Milliseconds spent in the downstream model
    pub llm_duration: u64,

    /// Milliseconds from receipt to outcome
    pub total_duration: u64,

    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl CompletionPerformance {
    /// Start a timing record now
    pub fn new() -> Self {
        Self {
            receive_time: Utc::now(),
            received_at: Instant::now(),
            enqueued_at: None,
            context_duration: 0,
            queue_duration: 0,
            llm_duration: 0,
            total_duration: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Mark the request as enqueued now
    pub fn mark_enqueued(&mut self) {
        self.enqueued_at = Some(Instant::now());
    }

    /// Record time spent queued, measured from the enqueue instant
    pub fn finish_queue(&mut self) {
        let since = self.enqueued_at.unwrap_or(self.received_at);
        self.queue_duration = since.elapsed().as_millis() as u64;
    }

    /// Record time spent since receipt as the context phase
    pub fn finish_context(&mut self) {
        self.context_duration = self.received_at.elapsed().as_millis() as u64;
    }

    fn finish_total(&mut self) {
        self.total_duration = self.received_at.elapsed().as_millis() as u64;
    }
}

impl Default for CompletionPerformance {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic record of the downstream exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionVerbose {
    pub id: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
}

/// Outcome delivered to the caller; one per request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub object: &'static str,
    pub choices: Vec<CompletionChoice>,
    pub created: i64,
    pub usage: CompletionPerformance,
    pub status: CompletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<CompletionVerbose>,
}

impl CompletionResponse {
    /// Build a successful response
    pub fn success(
        id: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        perf: &mut CompletionPerformance,
        verbose: Option<CompletionVerbose>,
    ) -> Self {
        Self::finish(id.into(), model.into(), text.into(), CompletionStatus::Success, perf, verbose, None)
    }

    /// Build a non-success response
    pub fn failure(
        id: impl Into<String>,
        model: impl Into<String>,
        status: CompletionStatus,
        perf: &mut CompletionPerformance,
        verbose: Option<CompletionVerbose>,
        error: impl fmt::Display,
    ) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            error = status.to_string();
        }
        Self::finish(id.into(), model.into(), String::new(), status, perf, verbose, Some(error))
    }

    fn finish(
        id: String,
        model: String,
        text: String,
        status: CompletionStatus,
        perf: &mut CompletionPerformance,
        verbose: Option<CompletionVerbose>,
        error: Option<String>,
    ) -> Self {
        perf.finish_total();
        Self {
            id,
            model,
            object: "text_completion",
            choices: vec![CompletionChoice { text }],
            created: perf.receive_time.timestamp(),
            usage: perf.clone(),
            status,
            error,
            verbose,
        }
    }

    /// Publish the phase durations, status and token usage of this outcome
    /// under `model_label`. Called once per request, on the outcome handed
    /// back to the caller.
    pub fn record_metrics(&self, model_label: &str) {
        metrics::record_completion(model_label, self.status, &self.usage);
    }

    /// Completion text of the first choice
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.text.as_str()).unwrap_or_default()
    }
}
