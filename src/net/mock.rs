//! Scripted in-memory connector for engine and framer tests.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::{BoxedIo, Connector};
use crate::proxy::target::NormalizedTarget;

/// What the fake upstream does for one connection.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Read the request head, then write each chunk with a pause in between.
    /// With `hold_open`, the upstream keeps its end open until the proxy closes.
    Respond {
        chunks: Vec<Vec<u8>>,
        pause: Duration,
        hold_open: bool,
    },
    /// Every read fails with `ConnectionReset`.
    Reset,
    /// Serve the bytes, then fail reads with `UnexpectedEof` the way a TLS
    /// peer does when it closes without `close_notify`.
    ReplyThenEof(Vec<u8>),
    /// The connect future never resolves.
    Hang,
}

impl Script {
    /// Whole response in one write, then close.
    pub(crate) fn reply(bytes: &[u8]) -> Self {
        Script::Respond {
            chunks: vec![bytes.to_vec()],
            pause: Duration::ZERO,
            hold_open: false,
        }
    }

    /// Response split into writes of `size` bytes.
    pub(crate) fn reply_split(bytes: &[u8], size: usize) -> Self {
        Script::Respond {
            chunks: bytes.chunks(size).map(<[u8]>::to_vec).collect(),
            pause: Duration::from_millis(1),
            hold_open: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    /// Upstream halves that saw the proxy close its end.
    peer_closed: Arc<AtomicUsize>,
    /// Connect futures dropped before resolving.
    abandoned: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockConnector {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn peer_closed(&self) -> usize {
        self.peer_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Raw request heads received so far.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .collect()
    }
}

struct DropFlag(Arc<AtomicUsize>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self, _target: &NormalizedTarget) -> BoxFuture<'static, io::Result<BoxedIo>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Reset);

        match script {
            Script::Hang => {
                let flag = DropFlag(Arc::clone(&self.abandoned));
                Box::pin(async move {
                    let _flag = flag;
                    futures_util::future::pending::<io::Result<BoxedIo>>().await
                })
            }
            Script::Reset => Box::pin(async { Ok(Box::new(ResetIo) as BoxedIo) }),
            Script::ReplyThenEof(data) => {
                Box::pin(async move { Ok(Box::new(EofIo { data, pos: 0 }) as BoxedIo) })
            }
            Script::Respond {
                chunks,
                pause,
                hold_open,
            } => {
                let (client, server) = tokio::io::duplex(256 * 1024);
                let requests = Arc::clone(&self.requests);
                let peer_closed = Arc::clone(&self.peer_closed);
                tokio::spawn(serve(server, chunks, pause, hold_open, requests, peer_closed));
                Box::pin(async move { Ok(Box::new(client) as BoxedIo) })
            }
        }
    }
}

async fn serve(
    mut server: tokio::io::DuplexStream,
    chunks: Vec<Vec<u8>>,
    pause: Duration,
    hold_open: bool,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    peer_closed: Arc<AtomicUsize>,
) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match server.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => {
                peer_closed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    }
    requests.lock().unwrap().push(head);

    for chunk in chunks {
        if server.write_all(&chunk).await.is_err() || server.flush().await.is_err() {
            peer_closed.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    if hold_open {
        let mut sink = [0u8; 64];
        loop {
            match server.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
    peer_closed.fetch_add(1, Ordering::SeqCst);
}

/// Accepts writes; every read fails with a reset.
struct ResetIo;

impl AsyncRead for ResetIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
    }
}

impl AsyncWrite for ResetIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Accepts writes; reads drain `data`, then fail with `UnexpectedEof`.
struct EofIo {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for EofIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.data.len() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed connection without sending TLS close_notify",
            )));
        }
        let take = buf.remaining().min(self.data.len() - self.pos);
        let start = self.pos;
        buf.put_slice(&self.data[start..start + take]);
        self.pos += take;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for EofIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
