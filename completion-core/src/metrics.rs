//! Prometheus metrics for the completion gateway
//!
//! Exposes metrics in Prometheus format for monitoring and observability.
//! Updates are fire-and-forget and never gate scheduling decisions.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::types::{CompletionPerformance, CompletionStatus};

lazy_static! {
    /// Global Prometheus registry for gateway metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Request Metrics ==============

    /// Duration of each phase of a completion request, in milliseconds
    pub static ref COMPLETION_DURATIONS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "completion_durations",
            "Duration of each phase of completion requests in milliseconds"
        )
        .buckets(vec![
            50.0, 100.0, 150.0, 200.0, 300.0, 400.0, 500.0, 600.0, 800.0, 1000.0, 1200.0,
            1500.0, 2000.0, 2500.0, 3000.0, 5000.0,
        ]),
        &["model", "status", "phase"]
    ).expect("metric can be created");

    /// Input/output token counts per request
    pub static ref COMPLETION_TOKENS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "completion_tokens",
            "Number of input/output tokens in completion requests"
        )
        .buckets(vec![
            10.0, 20.0, 35.0, 50.0, 100.0, 200.0, 300.0, 500.0, 1000.0, 2000.0, 3000.0,
            4000.0, 5000.0,
        ]),
        &["model", "type"]
    ).expect("metric can be created");

    /// Total requests counter with model and status labels
    pub static ref COMPLETION_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("completion_requests_total", "Total number of completion requests"),
        &["model", "status"]
    ).expect("metric can be created");

    // ============== Concurrency Metrics ==============

    /// Registered (in-flight) requests across all pools
    pub static ref COMPLETION_CONCURRENT: Gauge = Gauge::with_opts(
        Opts::new(
            "completion_concurrent",
            "Current total number of concurrent connections across all model pools"
        )
    ).expect("metric can be created");

    /// Running requests per model pool
    pub static ref COMPLETION_CONCURRENT_BY_MODEL: GaugeVec = GaugeVec::new(
        Opts::new(
            "completion_concurrent_by_model",
            "Current number of concurrent connections per model pool"
        ),
        &["model"]
    ).expect("metric can be created");

    /// Requests refused at admission (no eligible pool or queue full)
    pub static ref COMPLETION_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "completion_rejected_total",
            "Total requests rejected because the model pool was busy"
        ),
        &["model"]
    ).expect("metric can be created");
}

/// Token direction label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Input,
    Output,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Input => "input",
            TokenType::Output => "output",
        }
    }
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(COMPLETION_DURATIONS.clone()))?;
    REGISTRY.register(Box::new(COMPLETION_TOKENS.clone()))?;
    REGISTRY.register(Box::new(COMPLETION_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMPLETION_CONCURRENT.clone()))?;
    REGISTRY.register(Box::new(COMPLETION_CONCURRENT_BY_MODEL.clone()))?;
    REGISTRY.register(Box::new(COMPLETION_REJECTED_TOTAL.clone()))?;
    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Record the phase durations, outcome and token usage of a finished request.
pub fn record_completion(model: &str, status: CompletionStatus, perf: &CompletionPerformance) {
    let status = status.as_str();
    let phases = [
        ("queue", perf.queue_duration),
        ("context", perf.context_duration),
        ("llm", perf.llm_duration),
        ("total", perf.total_duration),
    ];
    for (phase, millis) in phases {
        COMPLETION_DURATIONS
            .with_label_values(&[model, status, phase])
            .observe(millis as f64);
    }
    COMPLETION_REQUESTS_TOTAL.with_label_values(&[model, status]).inc();
    record_tokens(model, TokenType::Input, perf.prompt_tokens);
    record_tokens(model, TokenType::Output, perf.completion_tokens);
}

/// Record a token count for one direction.
pub fn record_tokens(model: &str, token_type: TokenType, count: u32) {
    COMPLETION_TOKENS
        .with_label_values(&[model, token_type.as_str()])
        .observe(count as f64);
}

/// Update the number of registered requests across all pools.
pub fn set_concurrent(count: usize) {
    COMPLETION_CONCURRENT.set(count as f64);
}

/// Update the number of running requests of one pool.
pub fn set_concurrent_by_model(model: &str, count: usize) {
    COMPLETION_CONCURRENT_BY_MODEL
        .with_label_values(&[model])
        .set(count as f64);
}

/// Record an admission rejection.
pub fn record_rejected(model: &str) {
    COMPLETION_REJECTED_TOTAL.with_label_values(&[model]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_gauges() {
        set_concurrent_by_model("metrics-test-model", 3);
        assert_eq!(
            COMPLETION_CONCURRENT_BY_MODEL
                .with_label_values(&["metrics-test-model"])
                .get(),
            3.0
        );
    }

    #[test]
    fn test_record_completion() {
        let perf = CompletionPerformance::new();
        record_completion("metrics-test-record", CompletionStatus::Busy, &perf);
        assert_eq!(
            COMPLETION_REQUESTS_TOTAL
                .with_label_values(&["metrics-test-record", "busy"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_encode_metrics() {
        let output = encode_metrics();
        // Should return something (even if registry not initialized)
        assert!(output.is_empty() || output.starts_with('#') || output.contains("completion"));
    }
}
