//! The platform-agnostic request descriptor handed to the engine.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};

use crate::error::ProxyError;

/// Client classification derived from the inbound User-Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Mobile,
    Desktop,
}

impl ClientKind {
    /// Classify from the UA, or from the `Sec-CH-UA-Mobile` hint when no UA was sent.
    pub fn classify(user_agent: Option<&str>, mobile_hint: Option<&str>) -> Self {
        match user_agent {
            Some(_) => Self::from_user_agent(user_agent),
            None if mobile_hint.map(str::trim) == Some("?1") => ClientKind::Mobile,
            None => ClientKind::Desktop,
        }
    }

    /// Mobile when the UA mentions mobile, android, iphone or ipad (any case).
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return ClientKind::Desktop;
        };
        let ua = ua.to_ascii_lowercase();
        if ["mobile", "android", "iphone", "ipad"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            ClientKind::Mobile
        } else {
            ClientKind::Desktop
        }
    }
}

/// The inbound header subset the engine looks at.
#[derive(Debug, Clone, Default)]
pub struct InboundHeaders {
    pub user_agent: Option<HeaderValue>,
    pub range: Option<HeaderValue>,
    pub if_none_match: Option<HeaderValue>,
    pub if_modified_since: Option<HeaderValue>,
    pub cookie: Option<HeaderValue>,
    pub authorization: Option<HeaderValue>,
    /// `Sec-CH-UA-Mobile` client hint; only consulted for classification.
    pub mobile_hint: Option<HeaderValue>,
}

impl InboundHeaders {
    /// Pick the relevant headers out of a full inbound header map.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let get = |name: HeaderName| headers.get(name).cloned();
        Self {
            user_agent: get(header::USER_AGENT),
            range: get(header::RANGE),
            if_none_match: get(header::IF_NONE_MATCH),
            if_modified_since: get(header::IF_MODIFIED_SINCE),
            cookie: get(header::COOKIE),
            authorization: get(header::AUTHORIZATION),
            mobile_hint: headers.get("sec-ch-ua-mobile").cloned(),
        }
    }

    /// Allow-listed headers forwarded verbatim when present.
    pub fn passthrough(&self) -> impl Iterator<Item = (HeaderName, &HeaderValue)> {
        [
            (header::IF_NONE_MATCH, self.if_none_match.as_ref()),
            (header::IF_MODIFIED_SINCE, self.if_modified_since.as_ref()),
            (header::COOKIE, self.cookie.as_ref()),
            (header::AUTHORIZATION, self.authorization.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// One proxied call. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    target: String,
    referer: Option<String>,
    method: Method,
    headers: InboundHeaders,
    client: ClientKind,
}

impl ProxyRequest {
    /// Validate the required fields at the boundary.
    ///
    /// A missing or blank `url` is [`ProxyError::MissingParameter`].
    pub fn new(
        target: Option<String>,
        referer: Option<String>,
        headers: InboundHeaders,
    ) -> Result<Self, ProxyError> {
        let target = target
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProxyError::MissingParameter)?;
        let referer = referer.filter(|r| !r.trim().is_empty());
        let client = ClientKind::classify(
            headers.user_agent.as_ref().and_then(|v| v.to_str().ok()),
            headers.mobile_hint.as_ref().and_then(|v| v.to_str().ok()),
        );

        Ok(Self {
            target,
            referer,
            method: Method::GET,
            headers,
            client,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &InboundHeaders {
        &self.headers
    }

    pub fn client(&self) -> ClientKind {
        self.client
    }
}
