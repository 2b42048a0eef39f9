//! Application state shared by the HTTP handlers.

use std::sync::Arc;

use completion_core::{GatewayConfig, StreamController};

use crate::logging::LogHandle;

/// Application state shared across all handlers
pub struct AppState {
    /// Scheduling core
    pub controller: Arc<StreamController>,

    /// Configuration the gateway was started with
    pub config: GatewayConfig,

    /// Runtime log filter; absent when logging is owned by someone else
    log_handle: Option<LogHandle>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: GatewayConfig, controller: Arc<StreamController>) -> Self {
        Self { controller, config, log_handle: None }
    }

    /// Attach the handle used by `POST /api/logs`
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    pub fn log_handle(&self) -> Option<&LogHandle> {
        self.log_handle.as_ref()
    }
}
