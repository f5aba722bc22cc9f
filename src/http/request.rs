//! Inbound request extraction and request IDs.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Translate the query string and headers into a `ProxyRequest`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Only the header subset the engine uses leaves this module

use axum::http::{HeaderMap, HeaderValue, Request};
use serde::Deserialize;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::proxy::request::{InboundHeaders, ProxyRequest};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Query parameters of the proxy route.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
    pub referer: Option<String>,
}

impl ProxyQuery {
    pub fn into_request(self, headers: &HeaderMap) -> Result<ProxyRequest, ProxyError> {
        ProxyRequest::new(self.url, self.referer, InboundHeaders::from_header_map(headers))
    }
}

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Read the request ID back out of a header map.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn builds_proxy_request_from_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (iPad)"));
        let query = ProxyQuery {
            url: Some("http://h/a.ts".into()),
            referer: Some("https://site.example/".into()),
        };

        let request = query.into_request(&headers).unwrap();
        assert_eq!(request.target(), "http://h/a.ts");
        assert_eq!(request.referer(), Some("https://site.example/"));
        assert_eq!(request.client(), crate::proxy::request::ClientKind::Mobile);
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = ProxyQuery::default().into_request(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ProxyError::MissingParameter));
    }

    #[test]
    fn request_ids_are_unique_uuids() {
        let request = Request::new(());
        let mut maker = UuidRequestId;
        let a = maker.make_request_id(&request).unwrap();
        let b = maker.make_request_id(&request).unwrap();
        assert_ne!(a.header_value(), b.header_value());
        assert!(Uuid::parse_str(a.header_value().to_str().unwrap()).is_ok());
    }

    #[test]
    fn request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(headers.request_id(), "unknown");
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc"));
        assert_eq!(headers.request_id(), "abc");
    }
}
