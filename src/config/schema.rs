//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the media proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Connect/download timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration for both transports.
    pub retries: RetryConfig,

    /// Upstream transport capabilities.
    pub transport: TransportConfig,

    /// Proxy route and outbound request defaults.
    pub proxy: RouteConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for upstream attempts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to establish the upstream connection (fetch: response headers).
    pub connect_ms: u64,

    /// Time allowed from connection success to body completion.
    pub download_ms: u64,

    /// Download timeout for playlist resources.
    pub playlist_download_ms: u64,

    /// Guard on producing response headers for a whole client request, in seconds.
    pub request_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn download(&self) -> Duration {
        Duration::from_millis(self.download_ms)
    }

    pub fn playlist_download(&self) -> Duration {
        Duration::from_millis(self.playlist_download_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            download_ms: 30_000,
            playlist_download_ms: 10_000,
            request_secs: 120,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after a connect-class failure on the fetch path.
    pub fetch_max_retries: u32,

    /// Connect timeout multiplier applied on every fetch retry.
    pub connect_backoff_factor: f64,

    /// Additional attempts after a connection reset on the socket path.
    pub reset_max_retries: u32,

    /// Fixed delay before retrying a reset connection, in milliseconds.
    pub reset_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch_max_retries: 2,
            connect_backoff_factor: 1.5,
            reset_max_retries: 1,
            reset_delay_ms: 500,
        }
    }
}

/// Which upstream transports the execution context provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Native fetch and raw sockets are both available.
    #[default]
    Auto,
    /// Only raw sockets; every request goes over the socket transport.
    SocketOnly,
    /// Only native fetch; targets that need a raw socket fail fast.
    FetchOnly,
}

/// Upstream transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,

    /// Skip certificate validation for upstream TLS.
    pub accept_invalid_certs: bool,

    /// Read buffer size for raw socket reads.
    pub read_buffer_bytes: usize,

    /// Maximum size of an upstream response header section.
    pub max_header_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Auto,
            accept_invalid_certs: true,
            read_buffer_bytes: 16 * 1024,
            max_header_bytes: 64 * 1024,
        }
    }
}

/// How the response is rendered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Relay the body chunk by chunk (long-lived host).
    #[default]
    Streaming,
    /// Materialize the body and send one complete response (edge/serverless).
    Buffered,
}

/// Proxy route configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Path the proxy handler is mounted on; also used in rewritten links.
    pub route_path: String,

    /// Delivery mode used by the bundled server.
    pub delivery: DeliveryMode,

    /// User-Agent sent when the client supplied none and looks like a desktop.
    pub desktop_user_agent: String,

    /// User-Agent sent when the client supplied none and looks mobile.
    pub mobile_user_agent: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            route_path: "/proxy".to_string(),
            delivery: DeliveryMode::Streaming,
            desktop_user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            mobile_user_agent: "Mozilla/5.0 (Linux; Android 10; SM-G981B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.162 Mobile Safari/537.36".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.timeouts.connect_ms, 5_000);
        assert_eq!(config.timeouts.download_ms, 30_000);
        assert_eq!(config.timeouts.playlist_download_ms, 10_000);
        assert_eq!(config.retries.fetch_max_retries, 2);
        assert_eq!(config.retries.reset_delay_ms, 500);
        assert_eq!(config.transport.mode, TransportMode::Auto);
        assert_eq!(config.proxy.route_path, "/proxy");
        assert_eq!(config.proxy.delivery, DeliveryMode::Streaming);
    }

    #[test]
    fn partial_sections_override_fields() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [transport]
            mode = "fetch_only"

            [proxy]
            delivery = "buffered"

            [timeouts]
            connect_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.mode, TransportMode::FetchOnly);
        assert!(config.transport.accept_invalid_certs);
        assert_eq!(config.proxy.delivery, DeliveryMode::Buffered);
        assert_eq!(config.timeouts.connect(), Duration::from_millis(250));
        assert_eq!(config.timeouts.download_ms, 30_000);
    }
}
