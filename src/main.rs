//! Media proxy server.
//!
//! ```text
//!     Client ──GET /proxy?url=…&referer=…──▶ http (axum) ──▶ proxy engine
//!                                                              │
//!                                       ┌──────────────────────┴──────────┐
//!                                       ▼                                 ▼
//!                                 fetch (reqwest)               raw socket (tcp/tls)
//!                                       │                                 │
//!                                       └────────────▶ origin ◀───────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use media_proxy::config::{load_config, ProxyConfig};
use media_proxy::lifecycle;
use media_proxy::observability::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "media-proxy", version, about = "Media resource reverse proxy")]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        route = %config.proxy.route_path,
        connect_ms = config.timeouts.connect_ms,
        download_ms = config.timeouts.download_ms,
        "media-proxy starting"
    );

    match lifecycle::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
