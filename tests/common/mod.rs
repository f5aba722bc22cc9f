//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use media_proxy::config::ProxyConfig;
use media_proxy::http::HttpServer;
use media_proxy::lifecycle::Shutdown;

/// What a mock upstream sends back for one request.
#[derive(Clone)]
pub struct Reply {
    pub chunks: Vec<Vec<u8>>,
    pub pause: Duration,
}

impl Reply {
    /// A complete response written in one piece.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            chunks: vec![bytes.into()],
            pause: Duration::ZERO,
        }
    }

    /// A complete response written in `size`-byte pieces.
    pub fn split(bytes: &[u8], size: usize) -> Self {
        Self {
            chunks: bytes.chunks(size).map(<[u8]>::to_vec).collect(),
            pause: Duration::from_millis(2),
        }
    }

    /// `200 OK` with a fixed body and optional extra headers.
    pub fn ok(content_type: &str, body: &[u8]) -> Self {
        let mut bytes = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            content_type,
            body.len()
        )
        .into_bytes();
        bytes.extend_from_slice(body);
        Self::raw(bytes)
    }
}

/// A raw TCP upstream that records every request head it receives.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    /// Serve `respond(request_head)` to every connection.
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);

        let seen = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let respond = Arc::clone(&respond);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    serve(socket, respond.as_ref(), &seen).await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    /// Serve the same reply to every connection.
    pub async fn fixed(reply: Reply) -> Self {
        Self::start(move |_| reply.clone()).await
    }

    /// `http://127.0.0.1:<port><path>`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<F>(mut socket: TcpStream, respond: &F, seen: &Mutex<Vec<String>>)
where
    F: Fn(&str) -> Reply,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let reply = respond(&head);
    seen.lock().unwrap().push(head);

    for chunk in reply.chunks {
        if socket.write_all(&chunk).await.is_err() {
            return;
        }
        if !reply.pause.is_zero() {
            tokio::time::sleep(reply.pause).await;
        }
    }
    let _ = socket.shutdown().await;
}

/// A proxy server running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub route_path: String,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestProxy {
    pub async fn start(configure: impl FnOnce(&mut ProxyConfig)) -> Self {
        let mut config = ProxyConfig::default();
        config.timeouts.connect_ms = 2_000;
        config.timeouts.download_ms = 5_000;
        configure(&mut config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let route_path = config.proxy.route_path.clone();
        let server = HttpServer::new(config).unwrap();

        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            server.run(listener, server_shutdown).await.unwrap();
        });

        Self {
            addr,
            route_path,
            shutdown,
            task,
        }
    }

    /// Proxy URL for `target`, with an optional referer.
    pub fn url_for(&self, target: &str, referer: Option<&str>) -> String {
        let mut url = format!(
            "http://{}{}?url={}",
            self.addr,
            self.route_path,
            urlencoding::encode(target)
        );
        if let Some(referer) = referer {
            url.push_str("&referer=");
            url.push_str(&urlencoding::encode(referer));
        }
        url
    }

    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Client that neither follows redirects nor uses system proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
