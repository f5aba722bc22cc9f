//! Raw socket capability.
//!
//! # Data Flow
//! ```text
//! NormalizedTarget (host, port, scheme)
//!     → Connector::connect (socket.rs: TCP, plus TLS via tls.rs for https)
//!     → ConnectionTracker::track (connection.rs: one guard per open socket)
//!     → BoxedIo handed to the raw HTTP framer
//! ```
//!
//! # Design Decisions
//! - The engine only sees the `Connector` trait; one implementation per
//!   execution environment, injected at construction
//! - Closing a socket is dropping it; the tracker guard drops with it
//! - Upstream certificates are not validated

use std::fmt;
use std::io;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::proxy::target::NormalizedTarget;

pub mod connection;
pub mod socket;
pub mod tls;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::{ConnectionId, ConnectionTracker, TrackedIo};
pub use socket::TcpConnector;

/// Bidirectional byte stream to an upstream origin.
pub trait UpstreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpstreamIo for T {}

/// Type-erased upstream socket.
pub type BoxedIo = Box<dyn UpstreamIo>;

/// Opens raw sockets to upstream targets.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a plain TCP or TLS socket to `target`.
    ///
    /// Dropping the returned future before it resolves must abandon the
    /// connection attempt.
    fn connect(&self, target: &NormalizedTarget) -> BoxFuture<'static, io::Result<BoxedIo>>;
}
