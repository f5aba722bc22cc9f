//! Header policy.
//!
//! # Responsibilities
//! - Build the outbound header set sent upstream
//! - Strip platform-internal and hop-by-hop headers from upstream responses
//! - Add the CORS headers every client response carries
//!
//! # Design Decisions
//! - Compression is disabled upstream (`Accept-Encoding: identity`) so bodies
//!   never need re-framing
//! - Range is forwarded verbatim, never synthesized
//! - An explicit Referer also re-derives Origin

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::config::RouteConfig;
use crate::proxy::request::{ClientKind, ProxyRequest};
use crate::proxy::target::NormalizedTarget;

/// Upstream response headers with these prefixes never reach the client.
pub const DENIED_PREFIXES: [&str; 3] = ["cf-", "x-vercel-", "cloudflare-"];

/// Hop-by-hop headers owned by each connection, not relayed.
pub const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
    "transfer-encoding",
];

/// Ordered header list sent upstream.
#[derive(Debug, Clone, Default)]
pub struct OutboundHeaders {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl OutboundHeaders {
    /// Set a header, replacing any earlier value in place.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, HeaderValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert for clients that take a `HeaderMap`.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.clone());
        }
        map
    }
}

/// Builds outbound headers from a request and its normalized target.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    desktop_user_agent: HeaderValue,
    mobile_user_agent: HeaderValue,
}

impl HeaderPolicy {
    pub fn new(config: &RouteConfig) -> Self {
        Self {
            desktop_user_agent: static_or_fallback(&config.desktop_user_agent),
            mobile_user_agent: static_or_fallback(&config.mobile_user_agent),
        }
    }

    /// Build the header set for one upstream request.
    pub fn outbound(&self, request: &ProxyRequest, target: &NormalizedTarget) -> OutboundHeaders {
        let inbound = request.headers();
        let mut headers = OutboundHeaders::default();

        let user_agent = match (&inbound.user_agent, request.client()) {
            (Some(ua), _) => ua.clone(),
            (None, ClientKind::Mobile) => self.mobile_user_agent.clone(),
            (None, ClientKind::Desktop) => self.desktop_user_agent.clone(),
        };
        headers.set(header::USER_AGENT, user_agent);

        if let Some(range) = &inbound.range {
            headers.set(header::RANGE, range.clone());
        }

        let (referer, origin) = referer_and_origin(request.referer(), target);
        headers.set(header::REFERER, referer);
        headers.set(header::ORIGIN, origin);

        headers.set(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.set(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        headers.set(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.set(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.set(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.set(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        for (name, value) in inbound.passthrough() {
            headers.set(name, value.clone());
        }

        headers
    }
}

fn static_or_fallback(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| {
        tracing::warn!("Configured user agent is not a valid header value, using 'Mozilla/5.0'");
        HeaderValue::from_static("Mozilla/5.0")
    })
}

/// Referer/Origin pair for the upstream request.
///
/// A custom Referer wins and re-derives Origin from itself; if that fails the
/// target's own origin is used.
fn referer_and_origin(custom: Option<&str>, target: &NormalizedTarget) -> (HeaderValue, HeaderValue) {
    let target_origin = HeaderValue::from_str(&target.origin())
        .unwrap_or_else(|_| HeaderValue::from_static("null"));

    let Some(custom) = custom else {
        return (target_origin.clone(), target_origin);
    };

    let referer = match HeaderValue::from_str(custom) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(upstream = %target.log_label(), "Custom referer is not a valid header value; using target origin");
            return (target_origin.clone(), target_origin);
        }
    };

    let origin = Url::parse(custom)
        .ok()
        .map(|url| url.origin())
        .filter(|origin| origin.is_tuple())
        .and_then(|origin| HeaderValue::from_str(&origin.ascii_serialization()).ok());

    match origin {
        Some(origin) => (referer, origin),
        None => {
            tracing::warn!(upstream = %target.log_label(), "Could not derive origin from custom referer; using target origin");
            (referer, target_origin)
        }
    }
}

/// True when an upstream header must not be relayed to the client.
pub fn is_denied(name: &HeaderName) -> bool {
    let name = name.as_str();
    DENIED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) || HOP_BY_HOP.contains(&name)
}

/// Remove denied and hop-by-hop headers from an upstream header map.
pub fn strip_upstream_headers(headers: &mut HeaderMap) {
    let denied: Vec<HeaderName> = headers.keys().filter(|n| is_denied(n)).cloned().collect();
    for name in denied {
        headers.remove(&name);
    }
}

/// Add the CORS headers present on every client response.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}
