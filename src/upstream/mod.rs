//! Upstream transports and the structured response they produce.
//!
//! # Data Flow
//! ```text
//! NormalizedTarget + OutboundHeaders
//!     → selector.rs (fetch or raw socket)
//!     → fetch.rs (reqwest)      | framer.rs (hand-written HTTP/1.1 over net::Connector)
//!     → RawResponse { status, headers, content_range, body }
//! ```

use std::fmt;

use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::ProxyError;

pub mod fetch;
pub mod framer;
pub mod selector;

pub use fetch::{FetchedResponse, Fetcher, ReqwestFetcher};
pub use framer::{FramerLimits, FramerState};
pub use selector::{select_transport, TransportKind};

/// Lazy body stream. Items arrive in upstream order.
pub type BodyStream = BoxStream<'static, Result<Bytes, ProxyError>>;

/// Parsed `Content-Range: bytes start-end/total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the total is `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse a `bytes start-end/total` value. `None` for anything malformed,
    /// including `end < start`.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.trim().split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        if end < start {
            return None;
        }
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        Some(Self { start, end, total })
    }

    /// Number of body bytes this range covers.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "bytes {}-{}/{}", self.start, self.end, total),
            None => write!(f, "bytes {}-{}/*", self.start, self.end),
        }
    }
}

/// Body of an upstream response.
pub enum ResponseBody {
    /// Fully materialized bytes.
    Buffered(Bytes),
    /// Bytes still being pulled from upstream.
    Streaming {
        stream: BodyStream,
        /// Expected total length, when the framing declared one.
        length: Option<u64>,
    },
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Buffered(Bytes::new())
    }

    /// Declared or known length.
    pub fn length(&self) -> Option<u64> {
        match self {
            ResponseBody::Buffered(bytes) => Some(bytes.len() as u64),
            ResponseBody::Streaming { length, .. } => *length,
        }
    }

    /// Pull the whole body into memory.
    pub async fn collect(self) -> Result<Bytes, ProxyError> {
        match self {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming { stream, length } => {
                let capacity = length.unwrap_or(0).min(8 * 1024 * 1024) as usize;
                let buf = stream
                    .try_fold(BytesMut::with_capacity(capacity), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// View the body as a stream; a buffered body yields one chunk.
    pub fn into_stream(self) -> BodyStream {
        match self {
            ResponseBody::Buffered(bytes) if bytes.is_empty() => stream::empty().boxed(),
            ResponseBody::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Streaming { stream, .. } => stream,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            ResponseBody::Streaming { length, .. } => f
                .debug_struct("Streaming")
                .field("length", length)
                .finish_non_exhaustive(),
        }
    }
}

/// Structured upstream response, independent of the transport that produced it.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub content_range: Option<ContentRange>,
    pub body: ResponseBody,
    pub transport: TransportKind,
}

impl RawResponse {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range() {
        let range = ContentRange::parse("bytes 0-99/500").unwrap();
        assert_eq!(range, ContentRange { start: 0, end: 99, total: Some(500) });
        assert_eq!(range.length(), 100);

        let range = ContentRange::parse("bytes 100-199/*").unwrap();
        assert_eq!(range.total, None);
        assert_eq!(range.to_string(), "bytes 100-199/*");
    }

    #[test]
    fn rejects_malformed_content_range() {
        assert!(ContentRange::parse("bytes 10-5/100").is_none());
        assert!(ContentRange::parse("items 0-9/10").is_none());
        assert!(ContentRange::parse("bytes */500").is_none());
        assert!(ContentRange::parse("bytes 0-x/10").is_none());
    }

    #[tokio::test]
    async fn collects_streamed_chunks_in_order() {
        let chunks = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let body = ResponseBody::Streaming {
            stream: stream::iter(chunks).boxed(),
            length: Some(4),
        };
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn collect_surfaces_stream_errors() {
        let chunks = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(ProxyError::TruncatedBody { expected: Some(4), received: 2 }),
        ];
        let body = ResponseBody::Streaming {
            stream: stream::iter(chunks).boxed(),
            length: Some(4),
        };
        assert!(matches!(
            body.collect().await,
            Err(ProxyError::TruncatedBody { expected: Some(4), received: 2 })
        ));
    }

    #[tokio::test]
    async fn buffered_body_streams_as_one_chunk() {
        let body = ResponseBody::Buffered(Bytes::from_static(b"xyz"));
        let chunks: Vec<_> = body.into_stream().try_collect().await.unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"xyz")]);

        let chunks: Vec<Bytes> = ResponseBody::empty().into_stream().try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }
}
