//! Proxy error taxonomy.
//!
//! Every failure the engine can surface to a client is one `ProxyError`
//! variant. Each variant owns its status code; the JSON body is always
//! `{"error": "<message>"}`.

use std::io;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::proxy::headers::apply_cors;

/// Errors that can occur while proxying one request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No target URL was supplied.
    #[error("missing url parameter")]
    MissingParameter,

    /// The target failed to parse as an absolute http(s) URL.
    #[error("invalid target url: {0}")]
    InvalidUrl(String),

    /// The raw socket transport is required but this context has none.
    #[error("raw socket transport unavailable for host {host}")]
    UnsupportedTransport { host: String },

    /// Connect phase exceeded its effective timeout.
    #[error("upstream connect timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    /// Download phase exceeded its effective timeout.
    #[error("upstream download timed out after {}ms", .0.as_millis())]
    DownloadTimeout(Duration),

    /// Upstream reset the connection.
    #[error("upstream connection reset")]
    ConnectionReset,

    /// Upstream closed before the body was complete. `expected` is `None`
    /// for chunked bodies, whose total length is never declared.
    #[error("upstream body truncated: {}", truncation(.expected, .received))]
    TruncatedBody { expected: Option<u64>, received: u64 },

    /// Malformed status line or otherwise unparsable response.
    #[error("malformed upstream response: {0}")]
    UpstreamParse(String),

    /// Anything else.
    #[error("proxy request failed: {0}")]
    Generic(String),
}

fn truncation(expected: &Option<u64>, received: &u64) -> String {
    match expected {
        Some(expected) => format!("expected {} bytes, received {}", expected, received),
        None => format!("chunked body ended after {} bytes", received),
    }
}

impl ProxyError {
    /// Status code sent to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingParameter | ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::UnsupportedTransport { .. } => StatusCode::NOT_IMPLEMENTED,
            ProxyError::ConnectTimeout(_) | ProxyError::DownloadTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ProxyError::TruncatedBody { .. } | ProxyError::UpstreamParse(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::ConnectionReset | ProxyError::Generic(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MissingParameter => "missing_parameter",
            ProxyError::InvalidUrl(_) => "invalid_url",
            ProxyError::UnsupportedTransport { .. } => "unsupported_transport",
            ProxyError::ConnectTimeout(_) => "connect_timeout",
            ProxyError::DownloadTimeout(_) => "download_timeout",
            ProxyError::ConnectionReset => "connection_reset",
            ProxyError::TruncatedBody { .. } => "truncated_body",
            ProxyError::UpstreamParse(_) => "upstream_parse",
            ProxyError::Generic(_) => "generic",
        }
    }

    /// Classify an I/O error from a socket or fetch body.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => ProxyError::ConnectionReset,
            _ => ProxyError::Generic(err.to_string()),
        }
    }

    /// True for resets, the only failure the socket path retries.
    pub fn is_reset(&self) -> bool {
        matches!(self, ProxyError::ConnectionReset)
    }
}

impl From<io::Error> for ProxyError {
    fn from(err: io::Error) -> Self {
        ProxyError::from_io(err)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (self.status_code(), body).into_response();
        apply_cors(response.headers_mut());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(ProxyError::MissingParameter.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::UnsupportedTransport { host: "1.2.3.4".into() }.status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            ProxyError::ConnectTimeout(Duration::from_secs(5)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::DownloadTimeout(Duration::from_secs(30)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ProxyError::ConnectionReset.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ProxyError::TruncatedBody { expected: Some(10), received: 3 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ProxyError::UpstreamParse("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::Generic("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn truncation_messages_distinguish_chunked_bodies() {
        let fixed = ProxyError::TruncatedBody { expected: Some(10), received: 4 };
        assert_eq!(fixed.to_string(), "upstream body truncated: expected 10 bytes, received 4");

        let chunked = ProxyError::TruncatedBody { expected: None, received: 4 };
        assert_eq!(chunked.to_string(), "upstream body truncated: chunked body ended after 4 bytes");
    }

    #[test]
    fn reset_is_classified_from_io() {
        let err = ProxyError::from_io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.is_reset());

        let err = ProxyError::from_io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!err.is_reset());
    }

    #[tokio::test]
    async fn missing_parameter_body_is_stable() {
        let response = ProxyError::MissingParameter.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "missing url parameter" }));
    }
}
