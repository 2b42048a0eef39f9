//! Gateway configuration.
//!
//! Loaded once at startup from a YAML file, then adjusted from environment
//! variables. Durations are carried as milliseconds and exposed as
//! [`Duration`] through accessor methods.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Pool name used when a model entry has no `modelName`
pub const DEFAULT_MODEL_NAME: &str = "default";

/// Configuration of one downstream completion model (one model pool)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    /// Provider / protocol spoken by the model endpoint
    pub provider: String,

    /// Unique label of the model source, reported in verbose output
    pub model_title: String,

    /// Real model name sent downstream; also the pool name
    pub model_name: String,

    /// Completions endpoint URL
    pub completions_url: String,

    /// Tags clients may use instead of the model name
    pub tags: Vec<String>,

    /// Value for the `Authorization` header
    pub authorization: String,

    /// HTTP timeout for one downstream call, in milliseconds (0 = none)
    pub timeout_ms: u64,

    /// Maximum prompt prefix length (characters, context included)
    pub max_prefix: usize,

    /// Maximum prompt suffix length (characters)
    pub max_suffix: usize,

    /// Maximum number of output tokens
    pub max_output: u32,

    /// Assemble the prompt with FIM markers
    pub fim_mode: bool,
    pub fim_begin: String,
    pub fim_end: String,
    pub fim_hole: String,
    pub fim_stop: Vec<String>,

    /// Maximum number of concurrent downstream calls for this model
    pub max_concurrent: usize,
}

impl ModelConfig {
    /// Create a minimal model config, mostly useful for tests and tooling
    pub fn new(model_name: impl Into<String>, max_concurrent: usize) -> Self {
        Self { model_name: model_name.into(), max_concurrent, ..Default::default() }
    }

    /// Builder-style helper to attach tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Pool name: the model name, or `"default"` when it is empty
    pub fn pool_name(&self) -> &str {
        if self.model_name.is_empty() {
            DEFAULT_MODEL_NAME
        } else {
            &self.model_name
        }
    }

    /// Downstream HTTP timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Global stream controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamControllerConfig {
    /// Period of the maintenance task (default: 300000)
    pub maintain_interval_ms: u64,

    /// Idle time after which a client record is dropped (default: 3600000)
    pub clean_older_than_ms: u64,

    /// Deadline applied to every completion request (default: 2500)
    pub completion_timeout_ms: u64,

    /// Parsed and reported but not enforced: admission never waits (default: 200)
    pub queue_timeout_ms: u64,
}

impl Default for StreamControllerConfig {
    fn default() -> Self {
        Self {
            maintain_interval_ms: 300_000,
            clean_older_than_ms: 3_600_000,
            completion_timeout_ms: 2_500,
            queue_timeout_ms: 200,
        }
    }
}

impl StreamControllerConfig {
    pub fn maintain_interval(&self) -> Duration {
        Duration::from_millis(self.maintain_interval_ms)
    }

    pub fn clean_older_than(&self) -> Duration {
        Duration::from_millis(self.clean_older_than_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Zero values fall back to the defaults
    fn reset_defaults(&mut self) {
        let defaults = Self::default();
        if self.maintain_interval_ms == 0 {
            self.maintain_interval_ms = defaults.maintain_interval_ms;
        }
        if self.clean_older_than_ms == 0 {
            self.clean_older_than_ms = defaults.clean_older_than_ms;
        }
        if self.completion_timeout_ms == 0 {
            self.completion_timeout_ms = defaults.completion_timeout_ms;
        }
        if self.queue_timeout_ms == 0 {
            self.queue_timeout_ms = defaults.queue_timeout_ms;
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Port to listen on (default: 8080)
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub server: ServerSettings,
    pub models: Vec<ModelConfig>,
    pub stream_controller: StreamControllerConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply defaults and env overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env();
        config.validate()?;
        info!(
            path = %path.display(),
            models = config.models.len(),
            completion_timeout_ms = config.stream_controller.completion_timeout_ms,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from YAML text and fill in defaults
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let text = text.replace("\r\n", "\n");
        let mut config: GatewayConfig = serde_yaml::from_str(&text)?;
        config.stream_controller.reset_defaults();
        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self) {
        if let Some(port) = env_parse("COMPLETION_PORT") {
            self.server.port = port;
        }
        if let Some(ms) = env_parse("COMPLETION_TIMEOUT_MS") {
            self.stream_controller.completion_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("COMPLETION_MAINTAIN_INTERVAL_MS") {
            self.stream_controller.maintain_interval_ms = ms;
        }
        if let Some(ms) = env_parse("COMPLETION_CLEAN_OLDER_THAN_MS") {
            self.stream_controller.clean_older_than_ms = ms;
        }
        self.stream_controller.reset_defaults();
    }

    /// Check that a pool can be built for every configured model
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        for model in &self.models {
            if model.max_concurrent == 0 {
                return Err(ConfigError::InvalidConcurrency {
                    model: model.pool_name().to_string(),
                    value: model.max_concurrent,
                });
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
