//! Completion Proxy - HTTP gateway for code-completion models.
//!
//! ## Quick Start
//!
//! ```bash
//! # Start with ./config.yaml
//! completion-proxy
//!
//! # Custom configuration
//! COMPLETION_PORT=9000 completion-proxy --config /etc/completion/config.yaml
//! ```

use clap::Parser;
use completion_core::GatewayConfig;
use completion_proxy::{logging, run_server};

#[derive(Parser, Debug)]
#[command(name = "completion-proxy")]
#[command(version, about = "HTTP gateway for code-completion models", long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "COMPLETION_CONFIG", default_value = "config.yaml")]
    config: String,

    /// Do not print the startup banner
    #[arg(long)]
    no_banner: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_handle = logging::init();

    let config = GatewayConfig::load(&args.config)?;
    run_server(config, Some(log_handle), !args.no_banner).await
}
