//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, factors >= 1)
//! - Check addresses and the route path
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_ms", timeouts.connect_ms),
        ("timeouts.download_ms", timeouts.download_ms),
        ("timeouts.playlist_download_ms", timeouts.playlist_download_ms),
        ("timeouts.request_secs", timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    let factor = config.retries.connect_backoff_factor;
    if !factor.is_finite() || factor < 1.0 {
        errors.push(ValidationError::new(
            "retries.connect_backoff_factor",
            format!("must be >= 1.0, got {}", factor),
        ));
    }

    if config.transport.read_buffer_bytes == 0 {
        errors.push(ValidationError::new(
            "transport.read_buffer_bytes",
            "must be greater than zero",
        ));
    }
    if config.transport.max_header_bytes < 4 {
        errors.push(ValidationError::new(
            "transport.max_header_bytes",
            "must be at least 4 bytes",
        ));
    }

    let route = &config.proxy.route_path;
    if !route.starts_with('/') {
        errors.push(ValidationError::new("proxy.route_path", "must start with '/'"));
    } else if route == "/health" {
        errors.push(ValidationError::new(
            "proxy.route_path",
            "conflicts with the health endpoint",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
