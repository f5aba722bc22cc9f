//! Native fetch transport.
//!
//! The connect timeout bounds time to response headers; the download
//! timeout runs from there to the end of the body.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use url::Url;

use super::{BodyStream, ContentRange, RawResponse, ResponseBody, TransportKind};
use crate::error::ProxyError;
use crate::proxy::headers::OutboundHeaders;
use crate::proxy::target::NormalizedTarget;
use crate::resilience::AttemptTimeouts;

/// Response as handed back by a fetch implementation.
pub struct FetchedResponse {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for FetchedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Stream-capable HTTP client capability.
///
/// Implementations must not follow redirects; the engine rewrites them.
/// Dropping the returned future or body stream must abort the request.
pub trait Fetcher: Send + Sync + fmt::Debug {
    fn fetch(&self, url: &Url, headers: HeaderMap) -> BoxFuture<'static, io::Result<FetchedResponse>>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(accept_invalid_certs: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for ReqwestFetcher {
    fn fetch(&self, url: &Url, headers: HeaderMap) -> BoxFuture<'static, io::Result<FetchedResponse>> {
        let request = self.client.get(url.clone()).headers(headers);
        Box::pin(async move {
            let response = request.send().await.map_err(reqwest_to_io)?;
            let status = response.status();
            let reason = status.canonical_reason().unwrap_or_default().to_string();
            let headers = response.headers().clone();
            let body = response.bytes_stream().map_err(reqwest_to_io).boxed();
            Ok(FetchedResponse {
                status,
                reason,
                headers,
                body,
            })
        })
    }
}

/// Keep the kind of the underlying I/O error so resets stay resets.
fn reqwest_to_io(err: reqwest::Error) -> io::Error {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return io::Error::new(io_err.kind(), err.to_string());
        }
        source = cause.source();
    }
    if err.is_timeout() {
        return io::Error::new(io::ErrorKind::TimedOut, err.to_string());
    }
    io::Error::other(err)
}

/// One fetch attempt under the given timeouts.
pub async fn fetch_attempt(
    fetcher: &dyn Fetcher,
    target: &NormalizedTarget,
    headers: &OutboundHeaders,
    timeouts: AttemptTimeouts,
) -> Result<RawResponse, ProxyError> {
    let fetched = match timeout(timeouts.connect, fetcher.fetch(target.url(), headers.to_header_map())).await {
        Ok(result) => result.map_err(ProxyError::from_io)?,
        Err(_) => return Err(ProxyError::ConnectTimeout(timeouts.connect)),
    };
    let deadline = Instant::now() + timeouts.download;

    let content_range = fetched
        .headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ContentRange::parse);
    let length = declared_length(fetched.status, &fetched.headers, content_range);

    tracing::debug!(
        upstream = %target.log_label(),
        status = fetched.status.as_u16(),
        content_length = ?length,
        "Fetch response headers received"
    );

    Ok(RawResponse {
        status: fetched.status,
        reason: fetched.reason,
        headers: fetched.headers,
        content_range,
        body: ResponseBody::Streaming {
            stream: with_deadline(fetched.body, deadline, timeouts, length),
            length,
        },
        transport: TransportKind::Fetch,
    })
}

/// Body length the response promises: the Content-Range span on a 206,
/// otherwise Content-Length. Bodiless statuses promise nothing.
fn declared_length(
    status: StatusCode,
    headers: &HeaderMap,
    content_range: Option<ContentRange>,
) -> Option<u64> {
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return None;
    }
    if status == StatusCode::PARTIAL_CONTENT {
        if let Some(range) = content_range {
            return Some(range.length());
        }
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Bound a body stream by an absolute deadline. Expiry drops the inner
/// stream, which aborts the request.
///
/// With a declared length, a body that errors or ends short of it is
/// `TruncatedBody`; resets keep their own kind.
fn with_deadline(
    body: BoxStream<'static, io::Result<Bytes>>,
    deadline: Instant,
    timeouts: AttemptTimeouts,
    expected: Option<u64>,
) -> BodyStream {
    let short = move |received: u64| expected.filter(|expected| received < *expected);

    stream::try_unfold((body, 0u64), move |(mut body, received)| async move {
        match timeout_at(deadline, body.next()).await {
            Ok(Some(Ok(chunk))) => {
                let received = received + chunk.len() as u64;
                Ok(Some((chunk, (body, received))))
            }
            Ok(Some(Err(e))) => match short(received) {
                Some(expected) if e.kind() != io::ErrorKind::ConnectionReset => {
                    tracing::debug!(error = %e, "Fetch body failed before its declared length");
                    Err(ProxyError::TruncatedBody {
                        expected: Some(expected),
                        received,
                    })
                }
                _ => Err(ProxyError::from_io(e)),
            },
            Ok(None) => match short(received) {
                Some(expected) => Err(ProxyError::TruncatedBody {
                    expected: Some(expected),
                    received,
                }),
                None => Ok(None),
            },
            Err(_) => Err(ProxyError::DownloadTimeout(timeouts.download)),
        }
    })
    .boxed()
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// What the fake client does for one call.
    #[derive(Debug, Clone)]
    pub(crate) enum FetchScript {
        Respond {
            status: u16,
            headers: Vec<(&'static str, &'static str)>,
            chunks: Vec<&'static [u8]>,
        },
        /// Headers never arrive.
        Hang,
        /// Headers arrive, then the body stalls after the given chunks.
        Stall {
            chunks: Vec<&'static [u8]>,
        },
        Fail(io::ErrorKind),
        /// Headers arrive, the given chunks follow, then the body errors.
        Abort {
            headers: Vec<(&'static str, &'static str)>,
            chunks: Vec<&'static [u8]>,
        },
    }

    #[derive(Debug, Default)]
    pub(crate) struct MockFetcher {
        scripts: Mutex<VecDeque<FetchScript>>,
        calls: AtomicUsize,
        pub(crate) seen_headers: Arc<Mutex<Vec<HeaderMap>>>,
        call_times: Arc<Mutex<Vec<std::time::Instant>>>,
    }

    impl MockFetcher {
        pub(crate) fn new(scripts: Vec<FetchScript>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn call_times(&self) -> Vec<std::time::Instant> {
            self.call_times.lock().unwrap().clone()
        }
    }

    impl Fetcher for MockFetcher {
        fn fetch(&self, _url: &Url, headers: HeaderMap) -> BoxFuture<'static, io::Result<FetchedResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().unwrap().push(std::time::Instant::now());
            self.seen_headers.lock().unwrap().push(headers);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(FetchScript::Hang);

            Box::pin(async move {
                match script {
                    FetchScript::Hang => futures_util::future::pending().await,
                    FetchScript::Fail(kind) => Err(io::Error::from(kind)),
                    FetchScript::Respond { status, headers, chunks } => {
                        let map = header_map(headers);
                        let body = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed();
                        Ok(FetchedResponse {
                            status: StatusCode::from_u16(status).unwrap(),
                            reason: String::new(),
                            headers: map,
                            body,
                        })
                    }
                    FetchScript::Abort { headers, chunks } => {
                        let body = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
                            .chain(stream::once(async {
                                Err(io::Error::other("error decoding response body"))
                            }))
                            .boxed();
                        Ok(FetchedResponse {
                            status: StatusCode::OK,
                            reason: String::new(),
                            headers: header_map(headers),
                            body,
                        })
                    }
                    FetchScript::Stall { chunks } => {
                        let body = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
                            .chain(stream::pending())
                            .boxed();
                        Ok(FetchedResponse {
                            status: StatusCode::OK,
                            reason: String::new(),
                            headers: HeaderMap::new(),
                            body,
                        })
                    }
                }
            })
        }
    }

    fn header_map(headers: Vec<(&'static str, &'static str)>) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                axum::http::HeaderName::from_static(name),
                axum::http::HeaderValue::from_static(value),
            );
        }
        map
    }

    pub(crate) fn ok(chunks: Vec<&'static [u8]>) -> FetchScript {
        FetchScript::Respond {
            status: 200,
            headers: vec![],
            chunks,
        }
    }
}
