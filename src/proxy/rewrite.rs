//! Redirect and HLS playlist rewriting.
//!
//! Both rewrites turn upstream URLs into links back to the proxy route so
//! that the client's follow-up requests are proxied too.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use url::Url;

use crate::proxy::target::NormalizedTarget;

const PLAYLIST_CONTENT_TYPES: [&str; 2] = ["application/vnd.apple.mpegurl", "application/x-mpegurl"];
const URI_ATTRIBUTE: &str = "URI=\"";

/// Builds proxy-relative links.
#[derive(Debug, Clone, Copy)]
pub struct ProxyLinks<'a> {
    route_path: &'a str,
    referer: Option<&'a str>,
}

impl<'a> ProxyLinks<'a> {
    pub fn new(route_path: &'a str, referer: Option<&'a str>) -> Self {
        Self { route_path, referer }
    }

    /// `<route>?url=<encoded>[&referer=<encoded>]`.
    pub fn link(&self, url: &Url) -> String {
        let mut link = format!(
            "{}?url={}",
            self.route_path,
            urlencoding::encode(url.as_str())
        );
        if let Some(referer) = self.referer {
            link.push_str("&referer=");
            link.push_str(&urlencoding::encode(referer));
        }
        link
    }

    /// True only for links shaped like [`ProxyLinks::link`] output: the
    /// route, then `?url=` carrying an absolute http(s) URL.
    fn is_own_link(&self, reference: &str) -> bool {
        let Some(encoded) = reference
            .strip_prefix(self.route_path)
            .and_then(|rest| rest.strip_prefix("?url="))
        else {
            return false;
        };
        let encoded = encoded.split('&').next().unwrap_or_default();
        urlencoding::decode(encoded)
            .ok()
            .and_then(|decoded| Url::parse(&decoded).ok())
            .is_some_and(|url| matches!(url.scheme(), "http" | "https"))
    }

    /// Resolve `reference` against `base` and proxy it. `None` when the
    /// reference does not resolve.
    fn proxied(&self, base: &Url, reference: &str) -> Option<String> {
        if self.is_own_link(reference) {
            return Some(reference.to_string());
        }
        base.join(reference).ok().map(|resolved| self.link(&resolved))
    }
}

/// Rewrite `Location` on a 301/302/303/307/308 response.
///
/// Returns whether the header was rewritten. A Location that cannot be
/// resolved is logged and left as-is.
pub fn rewrite_location(
    status: StatusCode,
    headers: &mut HeaderMap,
    base: &Url,
    links: &ProxyLinks<'_>,
) -> bool {
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return false;
    }
    let Some(location) = headers.get(header::LOCATION) else {
        return false;
    };

    let rewritten = location
        .to_str()
        .ok()
        .and_then(|value| links.proxied(base, value.trim()))
        .and_then(|link| HeaderValue::from_str(&link).ok());

    match rewritten {
        Some(value) => {
            headers.insert(header::LOCATION, value);
            true
        }
        None => {
            tracing::warn!(
                status = status.as_u16(),
                location = ?location,
                "Could not rewrite redirect Location; passing it through"
            );
            false
        }
    }
}

/// True for HLS playlists, by content type or by URL path.
pub fn is_playlist(headers: &HeaderMap, target: &NormalizedTarget) -> bool {
    let by_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
        .is_some_and(|v| PLAYLIST_CONTENT_TYPES.iter().any(|t| v.contains(t)));
    by_type || target.is_playlist_path()
}

/// Rewrite every segment line and `URI="..."` attribute of a playlist.
/// Line endings are preserved; lines that fail to resolve are kept.
pub fn rewrite_playlist(text: &str, base: &Url, links: &ProxyLinks<'_>) -> String {
    let mut out = String::with_capacity(text.len() * 2);

    for raw_line in text.split_inclusive('\n') {
        let content = raw_line.trim_end_matches(['\r', '\n']);
        let ending = &raw_line[content.len()..];
        let trimmed = content.trim();

        if trimmed.is_empty() {
            out.push_str(raw_line);
        } else if trimmed.starts_with('#') {
            out.push_str(&rewrite_uri_attributes(content, base, links));
            out.push_str(ending);
        } else {
            match links.proxied(base, trimmed) {
                Some(link) => out.push_str(&link),
                None => out.push_str(content),
            }
            out.push_str(ending);
        }
    }

    out
}

fn rewrite_uri_attributes(line: &str, base: &Url, links: &ProxyLinks<'_>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find(URI_ATTRIBUTE) {
        let value_start = start + URI_ATTRIBUTE.len();
        let Some(len) = rest[value_start..].find('"') else {
            break;
        };
        let value = &rest[value_start..value_start + len];

        out.push_str(&rest[..value_start]);
        match links.proxied(base, value) {
            Some(link) => out.push_str(&link),
            None => out.push_str(value),
        }
        out.push('"');
        rest = &rest[value_start + len + 1..];
    }

    out.push_str(rest);
    out
}

/// Headers for a rewritten playlist: never cached, framing left to delivery.
pub fn apply_playlist_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONTENT_RANGE);
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PLAYLIST_CONTENT_TYPES[0]),
        );
    }
}
