//! Upstream socket lifecycle tracking.
//!
//! Every raw socket the engine opens is wrapped in a [`TrackedIo`]; the
//! socket counts as open until that wrapper is dropped.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::BoxedIo;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an upstream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream-{}", self.0)
    }
}

/// Counts upstream sockets that have been opened and not yet closed.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a freshly connected socket. The count drops when the wrapper drops.
    pub fn track(&self, io: BoxedIo) -> TrackedIo {
        self.open.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard {
            open: Arc::clone(&self.open),
            id: ConnectionId::new(),
        };
        tracing::trace!(connection_id = %guard.id, "Upstream socket opened");
        TrackedIo { io, guard }
    }

    /// Number of upstream sockets currently open.
    pub fn open_count(&self) -> u64 {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ConnectionGuard {
    open: Arc<AtomicU64>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Upstream socket closed");
    }
}

/// An upstream socket paired with its tracking guard.
pub struct TrackedIo {
    io: BoxedIo,
    guard: ConnectionGuard,
}

impl TrackedIo {
    pub fn id(&self) -> ConnectionId {
        self.guard.id
    }
}

impl std::fmt::Debug for TrackedIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedIo").field("id", &self.guard.id).finish()
    }
}

impl AsyncRead for TrackedIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
