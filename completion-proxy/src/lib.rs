//! Completion Proxy Library
//!
//! HTTP gateway in front of code-completion models.
//!
//! Editor plugins and OpenAI-compatible clients post completion requests;
//! the gateway keeps one live request per client, bounds concurrency per
//! downstream model and answers every request with a typed outcome. The
//! scheduling itself lives in `completion-core`; this crate wires it to
//! HTTP and to the downstream models.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use completion_core::{GatewayConfig, Llm, PoolManager, StreamController};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod client;
pub mod convert;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;
pub mod types;

pub use client::OpenAiModel;
pub use error::ProxyError;
pub use state::AppState;

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = completion_core::metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the HTTP router over `state`
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/healthz", get(routes::healthz))
        .route("/metrics", get(routes::metrics))
        // Completion endpoints
        .route("/code-completion/api/v1/completions", post(routes::completions_v1))
        .route("/code-completion/api/v2/completions", post(routes::completions_v2))
        .route("/api/completions", post(routes::completions_openai))
        // Operational endpoints
        .route("/api/stats", get(routes::stats))
        .route("/api/details", get(routes::details))
        .route("/api/logs", post(routes::set_log_level))
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build one pool per configured model
pub fn build_pools(config: &GatewayConfig) -> anyhow::Result<PoolManager> {
    let mut models: Vec<Arc<dyn Llm>> = Vec::with_capacity(config.models.len());
    for cfg in &config.models {
        models.push(Arc::new(OpenAiModel::new(cfg.clone())?));
    }
    Ok(PoolManager::from_models(models)?)
}

/// Run the completion gateway.
///
/// Starts the stream controller and its maintenance task, then serves HTTP
/// until Ctrl-C. On shutdown every in-flight request is canceled.
///
/// # Example
/// ```no_run
/// use completion_core::GatewayConfig;
/// use completion_proxy::run_server;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = GatewayConfig::load("config.yaml")?;
///     run_server(config, None, false).await
/// }
/// ```
pub async fn run_server(
    config: GatewayConfig,
    log_handle: Option<logging::LogHandle>,
    print_banner: bool,
) -> anyhow::Result<()> {
    init_metrics();

    info!(
        port = config.server.port,
        models = config.models.len(),
        "Starting Completion Proxy v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pools = build_pools(&config)?;
    let controller = Arc::new(StreamController::new(config.stream_controller.clone(), pools));
    let maintenance = controller.start_maintenance(config.stream_controller.maintain_interval());

    let mut state = AppState::new(config.clone(), Arc::clone(&controller));
    if let Some(handle) = log_handle {
        state = state.with_log_handle(handle);
    }
    let app = build_router(Arc::new(state));

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Completion Proxy listening on http://{}", addr);
    if print_banner {
        print_banner_text(&config);
    }

    let shutdown_controller = Arc::clone(&controller);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            shutdown_controller.shutdown();
        })
        .await?;

    controller.shutdown();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Maintenance task ended abnormally");
    }
    info!("Completion Proxy stopped");
    Ok(())
}

/// Print the startup banner
fn print_banner_text(config: &GatewayConfig) {
    let sc = &config.stream_controller;

    println!();
    println!("==================================================");
    println!("  Completion Proxy v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://0.0.0.0:{}", config.server.port);
    println!();
    println!("  Stream controller:");
    println!("    Completion timeout: {}ms", sc.completion_timeout_ms);
    println!("    Maintain interval:  {}ms", sc.maintain_interval_ms);
    println!("    Clean older than:   {}ms", sc.clean_older_than_ms);
    println!();
    println!("  Models:");
    for model in &config.models {
        println!(
            "    {} (max concurrent: {}, tags: [{}])",
            model.pool_name(),
            model.max_concurrent,
            model.tags.join(", ")
        );
        println!("      -> {}", model.completions_url);
    }
    println!();
    println!("  Endpoints:");
    println!("    Plugin: POST /code-completion/api/v1/completions");
    println!("            POST /code-completion/api/v2/completions");
    println!("    OpenAI: POST /api/completions");
    println!("    Ops:    GET  /api/stats, /api/details; POST /api/logs");
    println!("    Health: GET  /healthz, /metrics");
    println!("==================================================");
    println!();
}
