//! Transport selection.

use std::fmt;

use crate::config::TransportMode;
use crate::error::ProxyError;
use crate::proxy::target::NormalizedTarget;

/// Upstream transport used for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Stream-capable native HTTP client.
    Fetch,
    /// Hand-written HTTP over a raw TCP/TLS socket.
    Socket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Fetch => "fetch",
            TransportKind::Socket => "socket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when the target can only be reached over a raw socket: a bare IP
/// host or a non-standard port.
pub fn needs_socket(target: &NormalizedTarget) -> bool {
    target.kind().is_ip() || !target.has_standard_port()
}

/// Pick the transport for `target` given what this context provides.
///
/// A socket-only context always uses the socket. A context without a socket
/// capability fails with `UnsupportedTransport` whenever the socket is needed.
pub fn select_transport(
    target: &NormalizedTarget,
    mode: TransportMode,
    has_fetch: bool,
    has_socket: bool,
) -> Result<TransportKind, ProxyError> {
    let socket_available = has_socket && mode != TransportMode::FetchOnly;
    let fetch_available = has_fetch && mode != TransportMode::SocketOnly;

    let wanted = if mode == TransportMode::SocketOnly || needs_socket(target) || !fetch_available {
        TransportKind::Socket
    } else {
        TransportKind::Fetch
    };

    if wanted == TransportKind::Socket && !socket_available {
        return Err(ProxyError::UnsupportedTransport {
            host: target.host_header(),
        });
    }
    Ok(wanted)
}
