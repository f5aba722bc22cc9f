//! Target URL normalization and host classification.
//!
//! No network I/O happens here.

use std::fmt;
use std::net::Ipv6Addr;

use url::Url;

use crate::error::ProxyError;

/// Marker that flattens a `?ts=` query into the path of an embedded URL.
pub const TS_MARKER: &str = "_the_proxy_ts_url_";

const LIVE_SUFFIXES: [&str; 4] = ["?live=true", "&live=true", "?live%3Dtrue", "&live%3Dtrue"];

/// Kind of host named by the target URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Ipv4,
    Ipv6,
    Domain,
}

impl HostKind {
    /// Classify a hostname string.
    ///
    /// IPv4 requires exactly four dot-separated decimal octets, each <= 255.
    /// IPv6 must contain a colon and parse under the full IPv6 grammar,
    /// with or without surrounding brackets.
    pub fn classify(host: &str) -> Self {
        if is_ipv4(host) {
            HostKind::Ipv4
        } else if is_ipv6(host) {
            HostKind::Ipv6
        } else {
            HostKind::Domain
        }
    }

    pub fn is_ip(self) -> bool {
        !matches!(self, HostKind::Domain)
    }
}

fn is_ipv4(host: &str) -> bool {
    let mut octets = 0;
    for part in host.split('.') {
        octets += 1;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        match part.parse::<u16>() {
            Ok(value) if value <= 255 => {}
            _ => return false,
        }
    }
    octets == 4
}

fn is_ipv6(host: &str) -> bool {
    let inner = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    inner.contains(':') && inner.parse::<Ipv6Addr>().is_ok()
}

/// A parsed and classified target. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct NormalizedTarget {
    url: Url,
    host: String,
    port: u16,
    kind: HostKind,
}

impl NormalizedTarget {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Hostname without IPv6 brackets, suitable for connecting.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Default port for the scheme.
    pub fn default_port(&self) -> u16 {
        if self.is_https() {
            443
        } else {
            80
        }
    }

    pub fn has_standard_port(&self) -> bool {
        self.port == self.default_port()
    }

    /// Value for the `Host` header: bracketed for IPv6, port only when non-default.
    pub fn host_header(&self) -> String {
        let host = match self.kind {
            HostKind::Ipv6 => format!("[{}]", self.host),
            _ => self.host.clone(),
        };
        if self.has_standard_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// `path?query` for the request line.
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// `scheme://host[:port]`.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Host and path only; safe to log (no query credentials).
    pub fn log_label(&self) -> String {
        format!("{}{}", self.host_header(), self.url.path())
    }

    /// True when the path names an HLS playlist.
    pub fn is_playlist_path(&self) -> bool {
        let path = self.url.path();
        path.ends_with(".m3u8") || path.ends_with(".m3u")
    }
}

impl fmt::Display for NormalizedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Apply the textual rewrites that precede URL parsing.
///
/// 1. Strip a trailing `live=true` / `live%3Dtrue` query fragment.
/// 2. Unpack `<prefix>_the_proxy_ts_url_<suffix>` into `<prefix>?ts=<suffix>`.
pub fn canonicalize(raw: &str) -> String {
    let mut url = raw;
    for suffix in LIVE_SUFFIXES {
        if let Some(stripped) = url.strip_suffix(suffix) {
            url = stripped;
            break;
        }
    }

    match url.split_once(TS_MARKER) {
        Some((prefix, suffix)) => format!("{}?ts={}", prefix, suffix),
        None => url.to_string(),
    }
}

/// Canonicalize, parse and classify a raw target string.
pub fn normalize(raw: &str) -> Result<NormalizedTarget, ProxyError> {
    let canonical = canonicalize(raw.trim());
    let url = Url::parse(&canonical)
        .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", canonical, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProxyError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    }

    let host_str = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::InvalidUrl(format!("{}: missing host", canonical)))?;
    let kind = HostKind::classify(host_str);
    let host = host_str.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ProxyError::InvalidUrl(format!("{}: missing port", canonical)))?;

    Ok(NormalizedTarget {
        url,
        host,
        port,
        kind,
    })
}
