//! HTTP route handlers for the completion gateway.
//!
//! This module organizes all route handlers:
//! - `health`: Health check and Prometheus endpoints
//! - `completions`: v1, v2 and OpenAI-compatible completion routes
//! - `api`: Stream controller introspection and log control

pub mod api;
pub mod completions;
pub mod health;

// Re-export handlers for convenience
pub use api::{details, set_log_level, stats};
pub use completions::{completions_openai, completions_v1, completions_v2};
pub use health::{healthz, metrics};
