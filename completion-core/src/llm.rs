//! Downstream model abstraction.
//!
//! A model pool owns one [`Llm`] and calls it from its worker tasks. The call
//! is bounded by the request's cancellation token and deadline: when either
//! fires the worker drops the in-flight future, so implementations only need
//! to be cancel-safe, not cancellation-aware.

use std::fmt;

use async_trait::async_trait;

use crate::config::ModelConfig;
use crate::types::{CompletionParameter, CompletionStatus, CompletionVerbose};

/// Token accounting reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Successful downstream answer
#[derive(Debug, Clone, Default)]
pub struct LlmCompletion {
    /// Text of the first choice (may be empty)
    pub text: String,
    pub usage: LlmUsage,
    pub verbose: Option<CompletionVerbose>,
}

/// Failure category of a downstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// The request could not be built
    Request,
    /// Transport or decoding failure
    Server,
    /// The model answered with a non-success status
    Model,
    /// The call exceeded its deadline
    Timeout,
    /// The call was abandoned
    Canceled,
}

impl LlmErrorKind {
    pub fn status(&self) -> CompletionStatus {
        match self {
            LlmErrorKind::Request => CompletionStatus::ReqError,
            LlmErrorKind::Server => CompletionStatus::ServerError,
            LlmErrorKind::Model => CompletionStatus::ModelError,
            LlmErrorKind::Timeout => CompletionStatus::Timeout,
            LlmErrorKind::Canceled => CompletionStatus::Canceled,
        }
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

/// Error returned by a downstream model call
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// Whatever was exchanged with the model before the failure
    pub verbose: Option<CompletionVerbose>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), verbose: None }
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Request, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Server, message)
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Model, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Canceled, message)
    }

    /// Attach the diagnostic record
    pub fn with_verbose(mut self, verbose: CompletionVerbose) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn status(&self) -> CompletionStatus {
        self.kind.status()
    }
}

/// A downstream completion model
#[async_trait]
pub trait Llm: Send + Sync {
    /// Run one completion against the model
    async fn completions(&self, para: &CompletionParameter) -> Result<LlmCompletion, LlmError>;

    /// Configuration of the model behind this client
    fn config(&self) -> &ModelConfig;
}
