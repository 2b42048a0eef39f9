//! Error types for the completion core library
//!
//! None of these errors cross the public request path: the stream controller
//! turns every failure into a typed [`CompletionResponse`](crate::types::CompletionResponse).
//! They exist for the seams below it.
//!
//! # Error Hierarchy
//!
//! ```text
//! ConfigError  - Loading and validating gateway configuration
//! PoolError    - Admission onto a model pool's queue
//! LlmError     - Downstream model invocation (see crate::llm)
//! ```

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the expected shape
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// No model was configured, so no pool can be built
    #[error("Configuration is missing 'models'")]
    NoModels,

    /// A model was configured with an unusable concurrency limit
    #[error("Model '{model}' has invalid maxConcurrent {value} (must be at least 1)")]
    InvalidConcurrency { model: String, value: usize },
}

/// Errors raised when a request cannot be admitted onto a model pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The admission queue is at capacity
    #[error("model pool '{model}' busy, request rejected (queue capacity {capacity})")]
    Busy { model: String, capacity: usize },

    /// The pool's workers have shut down
    #[error("model pool '{model}' is closed")]
    Closed { model: String },

    /// A pool cannot run without workers
    #[error("model pool '{model}' has invalid maxConcurrent {value} (must be at least 1)")]
    InvalidConcurrency { model: String, value: usize },
}

impl PoolError {
    /// Create a busy error
    pub fn busy(model: impl Into<String>, capacity: usize) -> Self {
        Self::Busy { model: model.into(), capacity }
    }

    /// Create a closed error
    pub fn closed(model: impl Into<String>) -> Self {
        Self::Closed { model: model.into() }
    }

    /// Create an invalid concurrency error
    pub fn invalid_concurrency(model: impl Into<String>, value: usize) -> Self {
        Self::InvalidConcurrency { model: model.into(), value }
    }
}
