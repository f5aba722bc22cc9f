//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by status and transport
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_upstream_attempts_total` (counter): attempts by transport and outcome
//! - `proxy_upstream_retries_total` (counter): retries by transport
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, transport: &'static str, started: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "status" => status.to_string(),
        "transport" => transport
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "transport" => transport)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_attempt(transport: &'static str, outcome: &'static str) {
    metrics::counter!(
        "proxy_upstream_attempts_total",
        "transport" => transport,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retries(transport: &'static str, retries: u64) {
    metrics::counter!("proxy_upstream_retries_total", "transport" => transport).increment(retries);
}
