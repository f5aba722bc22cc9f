//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (metrics, engine, listener)
//! - Bind the listener last, so traffic only arrives when ready
//! - Serve until a signal triggers shutdown
//!
//! Any startup error is fatal; the caller reports it and exits.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::HttpServer;
use crate::lifecycle::{spawn_signal_handler, Shutdown};
use crate::observability::metrics::init_metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build proxy engine: {0}")]
    Engine(#[from] ProxyError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Start every subsystem for `config` and serve until shutdown.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config)?;

    let address = server.config().listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());

    let result = server.run(listener, shutdown).await;
    signals.abort();
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ProxyConfig::default();
        config.listener.bind_address = occupied.local_addr().unwrap().to_string();

        let err = run(config).await.unwrap_err();
        assert!(matches!(err, StartupError::Bind { .. }));
    }
}
