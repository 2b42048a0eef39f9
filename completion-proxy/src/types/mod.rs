//! Wire types for the completion gateway.
//!
//! `v1` is the editor plugin protocol, `openai` the OpenAI `/v1/completions`
//! protocol, spoken both inbound and towards the downstream models. The v2
//! protocol is [`CompletionParameter`](completion_core::CompletionParameter)
//! itself.

pub mod openai;
pub mod v1;

use serde::{Deserialize, Serialize};

/// Request body for POST /api/logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
}
