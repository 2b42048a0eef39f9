// Completion Core Library
//
// Admission control and scheduling for the code-completion gateway: bounded
// concurrency per model, single-flight per client, deadlines and cancellation.

pub mod config;
pub mod controller;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod types;

pub use config::{GatewayConfig, ModelConfig, StreamControllerConfig};
pub use controller::{PoolManager, StreamController};
pub use error::{ConfigError, PoolError};
pub use llm::{Llm, LlmCompletion, LlmError, LlmErrorKind, LlmUsage};
pub use types::{
    CompletionParameter, CompletionPerformance, CompletionResponse, CompletionStatus,
    CompletionVerbose,
};
