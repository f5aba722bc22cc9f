//! Hand-written HTTP/1.1 over a raw socket.
//!
//! # Responsibilities
//! - Write one GET request with the target's Host header
//! - Accumulate bytes until the first CRLFCRLF, then parse the head
//! - Pick the body framing (empty, chunked, fixed length, until close)
//! - Relay the body lazily, enforcing the download deadline
//!
//! # Design Decisions
//! - No header parsing happens before the boundary is found
//! - The socket lives inside the body reader; dropping the reader closes it
//! - A known length that is not reached is `TruncatedBody`, never a short body

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};

use super::{BodyStream, ContentRange, RawResponse, ResponseBody, TransportKind};
use crate::config::TransportConfig;
use crate::error::ProxyError;
use crate::net::{ConnectionTracker, Connector, TrackedIo};
use crate::proxy::headers::OutboundHeaders;
use crate::proxy::target::NormalizedTarget;
use crate::resilience::AttemptTimeouts;

const BOUNDARY: &[u8; 4] = b"\r\n\r\n";

/// Lifecycle of one raw exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    Connecting,
    AwaitingHeaders,
    HeadersComplete,
    Closed,
}

/// Buffer sizing for raw exchanges.
#[derive(Debug, Clone, Copy)]
pub struct FramerLimits {
    pub read_buffer_bytes: usize,
    pub max_header_bytes: usize,
}

impl From<&TransportConfig> for FramerLimits {
    fn from(config: &TransportConfig) -> Self {
        Self {
            read_buffer_bytes: config.read_buffer_bytes,
            max_header_bytes: config.max_header_bytes,
        }
    }
}

impl Default for FramerLimits {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

/// Index of the first `\r\n\r\n` at or after `from`.
pub fn find_double_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(BOUNDARY.len())
        .position(|w| w == BOUNDARY)
        .map(|pos| pos + from)
}

/// Parsed status line and header block.
#[derive(Debug)]
pub struct ResponseHead {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// Parse everything before the boundary.
///
/// The status line must be `HTTP/x SP code [SP reason]`. Header lines split
/// on the first `": "`; lines that don't are skipped.
pub fn parse_head(block: &[u8]) -> Result<ResponseHead, ProxyError> {
    let mut lines = block.split(|b| *b == b'\n').map(|line| line.strip_suffix(b"\r").unwrap_or(line));

    let status_line = lines
        .next()
        .and_then(|line| std::str::from_utf8(line).ok())
        .ok_or_else(|| ProxyError::UpstreamParse("unreadable status line".into()))?;

    let (version, rest) = status_line
        .split_once(' ')
        .filter(|(version, _)| version.starts_with("HTTP/"))
        .ok_or_else(|| ProxyError::UpstreamParse(format!("bad status line: {:?}", status_line)))?;
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = code
        .parse::<u16>()
        .ok()
        .filter(|_| code.len() == 3)
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| ProxyError::UpstreamParse(format!("bad status code: {:?}", code)))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let Some(split) = line.windows(2).position(|w| w == b": ") else {
            if !line.is_empty() {
                tracing::debug!(line = %String::from_utf8_lossy(line), "Skipping malformed header line");
            }
            continue;
        };
        let name = HeaderName::from_bytes(line[..split].trim_ascii());
        let value = HeaderValue::from_bytes(line[split + 2..].trim_ascii());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => {
                tracing::debug!(line = %String::from_utf8_lossy(line), "Skipping invalid header line");
            }
        }
    }

    Ok(ResponseHead {
        version: version.to_string(),
        status,
        reason: reason.trim().to_string(),
        headers,
    })
}

/// How the body following the head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Chunked,
    Fixed(u64),
    UntilClose,
}

/// Body framing, in precedence order: bodiless status, chunked, 206 with a
/// valid Content-Range, Content-Length, open-ended.
pub fn decide_framing(
    status: StatusCode,
    headers: &HeaderMap,
    content_range: Option<ContentRange>,
) -> Framing {
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Framing::Empty;
    }

    let chunked = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Framing::Chunked;
    }

    if status == StatusCode::PARTIAL_CONTENT {
        if let Some(range) = content_range {
            return Framing::Fixed(range.length());
        }
    }

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    match content_length {
        Some(length) => Framing::Fixed(length),
        None => Framing::UntilClose,
    }
}

/// Serialize the request head. `Host` comes first and the connection is
/// always `close`; the raw transport never reuses a socket.
pub fn encode_request(target: &NormalizedTarget, headers: &OutboundHeaders) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(format!("GET {} HTTP/1.1\r\n", target.request_target()).as_bytes());
    out.extend_from_slice(format!("Host: {}\r\n", target.host_header()).as_bytes());

    for (name, value) in headers.iter() {
        if name == header::HOST || name == header::CONNECTION {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out
}

fn transition(state: &mut FramerState, next: FramerState, target: &NormalizedTarget) {
    tracing::trace!(upstream = %target.log_label(), from = ?*state, to = ?next, "Framer state");
    *state = next;
}

/// Run one raw exchange: connect, send, read the head, and hand back a
/// response whose body is still attached to the socket.
pub async fn exchange(
    connector: &dyn Connector,
    tracker: &ConnectionTracker,
    target: &NormalizedTarget,
    headers: &OutboundHeaders,
    timeouts: AttemptTimeouts,
    limits: FramerLimits,
) -> Result<RawResponse, ProxyError> {
    let mut state = FramerState::Connecting;

    let io = match timeout(timeouts.connect, connector.connect(target)).await {
        Ok(Ok(io)) => tracker.track(io),
        Ok(Err(e)) => {
            transition(&mut state, FramerState::Closed, target);
            return Err(ProxyError::from_io(e));
        }
        Err(_) => {
            transition(&mut state, FramerState::Closed, target);
            return Err(ProxyError::ConnectTimeout(timeouts.connect));
        }
    };
    let deadline = Instant::now() + timeouts.download;
    let mut io = io;

    let request = encode_request(target, headers);
    let written = timeout_at(deadline, async {
        io.write_all(&request).await?;
        io.flush().await
    })
    .await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ProxyError::from_io(e)),
        Err(_) => return Err(ProxyError::DownloadTimeout(timeouts.download)),
    }
    transition(&mut state, FramerState::AwaitingHeaders, target);

    let mut buf = BytesMut::with_capacity(limits.read_buffer_bytes);
    let mut scanned = 0;
    let boundary = loop {
        if let Some(pos) = find_double_crlf(&buf, scanned) {
            break pos;
        }
        if buf.len() > limits.max_header_bytes {
            return Err(ProxyError::UpstreamParse(format!(
                "response head exceeds {} bytes",
                limits.max_header_bytes
            )));
        }
        scanned = buf.len().saturating_sub(BOUNDARY.len() - 1);

        buf.reserve(limits.read_buffer_bytes);
        let read = match timeout_at(deadline, io.read_buf(&mut buf)).await {
            Ok(read) => end_of_stream_as_zero(read)?,
            Err(_) => return Err(ProxyError::DownloadTimeout(timeouts.download)),
        };
        if read == 0 {
            return Err(ProxyError::UpstreamParse(
                "connection closed before response headers".into(),
            ));
        }
    };

    let remainder = buf.split_off(boundary + BOUNDARY.len());
    let head = parse_head(&buf[..boundary])?;
    transition(&mut state, FramerState::HeadersComplete, target);

    let content_range = match head.headers.get(header::CONTENT_RANGE) {
        Some(value) => {
            let parsed = value.to_str().ok().and_then(ContentRange::parse);
            if parsed.is_none() {
                tracing::warn!(
                    upstream = %target.log_label(),
                    status = head.status.as_u16(),
                    "Malformed Content-Range; falling back to length or open-ended framing"
                );
            }
            parsed
        }
        None => None,
    };
    let framing = decide_framing(head.status, &head.headers, content_range);

    tracing::debug!(
        upstream = %target.log_label(),
        version = %head.version,
        status = head.status.as_u16(),
        framing = ?framing,
        buffered = remainder.len(),
        "Upstream response head parsed"
    );

    let body = match framing {
        Framing::Empty | Framing::Fixed(0) => {
            drop(io);
            ResponseBody::empty()
        }
        Framing::Fixed(length) => ResponseBody::Streaming {
            stream: BodyReader::new(io, remainder, Decoder::fixed(length), deadline, timeouts, limits)
                .into_stream(),
            length: Some(length),
        },
        Framing::Chunked => ResponseBody::Streaming {
            stream: BodyReader::new(io, remainder, Decoder::Chunked(ChunkState::Size), deadline, timeouts, limits)
                .into_stream(),
            length: None,
        },
        Framing::UntilClose => ResponseBody::Streaming {
            stream: BodyReader::new(io, remainder, Decoder::UntilClose, deadline, timeouts, limits)
                .into_stream(),
            length: None,
        },
    };

    Ok(RawResponse {
        status: head.status,
        reason: head.reason,
        headers: head.headers,
        content_range,
        body,
        transport: TransportKind::Socket,
    })
}

#[derive(Debug, Clone, Copy)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy)]
enum Decoder {
    Fixed { expected: u64, remaining: u64 },
    Chunked(ChunkState),
    UntilClose,
}

impl Decoder {
    fn fixed(length: u64) -> Self {
        Decoder::Fixed {
            expected: length,
            remaining: length,
        }
    }
}

/// Pulls body bytes off the socket according to the chosen framing.
struct BodyReader {
    io: Option<TrackedIo>,
    buffered: BytesMut,
    decoder: Decoder,
    deadline: Instant,
    download: Duration,
    read_size: usize,
    received: u64,
}

impl BodyReader {
    fn new(
        io: TrackedIo,
        remainder: BytesMut,
        decoder: Decoder,
        deadline: Instant,
        timeouts: AttemptTimeouts,
        limits: FramerLimits,
    ) -> Self {
        Self {
            io: Some(io),
            buffered: remainder,
            decoder,
            deadline,
            download: timeouts.download,
            read_size: limits.read_buffer_bytes,
            received: 0,
        }
    }

    fn into_stream(self) -> BodyStream {
        stream::try_unfold(self, |mut reader| async move {
            match reader.next_chunk().await? {
                Some(chunk) => Ok(Some((chunk, reader))),
                None => Ok(None),
            }
        })
        .boxed()
    }

    /// Close the socket. Idempotent.
    fn close(&mut self) {
        if let Some(io) = self.io.take() {
            tracing::trace!(connection_id = %io.id(), received = self.received, "Closing upstream socket");
        }
    }

    fn fail(&mut self, err: ProxyError) -> ProxyError {
        self.close();
        err
    }

    fn truncated(&mut self, expected: Option<u64>) -> ProxyError {
        let received = self.received;
        self.fail(ProxyError::TruncatedBody { expected, received })
    }

    /// Read more bytes into the buffer. `Ok(0)` is end of stream.
    async fn fill(&mut self) -> Result<usize, ProxyError> {
        let Some(io) = self.io.as_mut() else {
            return Ok(0);
        };
        self.buffered.reserve(self.read_size);
        let result = timeout_at(self.deadline, io.read_buf(&mut self.buffered))
            .await
            .map(end_of_stream_as_zero);
        match result {
            Ok(Ok(read)) => Ok(read),
            Ok(Err(e)) => Err(self.fail(ProxyError::from_io(e))),
            Err(_) => {
                let download = self.download;
                Err(self.fail(ProxyError::DownloadTimeout(download)))
            }
        }
    }

    fn emit(&mut self, len: usize) -> Bytes {
        self.received += len as u64;
        self.buffered.split_to(len).freeze()
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ProxyError> {
        loop {
            match self.decoder {
                Decoder::Fixed { expected, remaining } => {
                    if remaining == 0 {
                        self.close();
                        return Ok(None);
                    }
                    if !self.buffered.is_empty() {
                        let take = remaining.min(self.buffered.len() as u64);
                        self.decoder = Decoder::Fixed {
                            expected,
                            remaining: remaining - take,
                        };
                        return Ok(Some(self.emit(take as usize)));
                    }
                    if self.fill().await? == 0 {
                        return Err(self.truncated(Some(expected)));
                    }
                }
                Decoder::UntilClose => {
                    if !self.buffered.is_empty() {
                        let len = self.buffered.len();
                        return Ok(Some(self.emit(len)));
                    }
                    if self.fill().await? == 0 {
                        self.close();
                        return Ok(None);
                    }
                }
                Decoder::Chunked(ChunkState::Size) => match self.take_line()? {
                    Some(line) => {
                        let size = parse_chunk_size(&line).map_err(|e| self.fail(e))?;
                        self.decoder = Decoder::Chunked(if size == 0 {
                            ChunkState::Trailers
                        } else {
                            ChunkState::Data(size)
                        });
                    }
                    None => {
                        if self.fill().await? == 0 {
                            return Err(self.truncated(None));
                        }
                    }
                },
                Decoder::Chunked(ChunkState::Data(remaining)) => {
                    if !self.buffered.is_empty() {
                        let take = remaining.min(self.buffered.len() as u64);
                        let left = remaining - take;
                        self.decoder = Decoder::Chunked(if left == 0 {
                            ChunkState::DataEnd
                        } else {
                            ChunkState::Data(left)
                        });
                        return Ok(Some(self.emit(take as usize)));
                    }
                    if self.fill().await? == 0 {
                        return Err(self.truncated(None));
                    }
                }
                Decoder::Chunked(ChunkState::DataEnd) => {
                    if self.buffered.len() >= 2 {
                        if &self.buffered[..2] != b"\r\n" {
                            return Err(self.fail(ProxyError::UpstreamParse(
                                "missing CRLF after chunk data".into(),
                            )));
                        }
                        let _ = self.buffered.split_to(2);
                        self.decoder = Decoder::Chunked(ChunkState::Size);
                    } else if self.fill().await? == 0 {
                        return Err(self.truncated(None));
                    }
                }
                Decoder::Chunked(ChunkState::Trailers) => match self.take_line()? {
                    Some(line) if line.is_empty() => {
                        self.close();
                        return Ok(None);
                    }
                    Some(_) => {}
                    None => {
                        if self.fill().await? == 0 {
                            // Peer closed after the last chunk without a final CRLF.
                            self.close();
                            return Ok(None);
                        }
                    }
                },
            }
        }
    }

    /// Split one CRLF-terminated line off the buffer, without the CRLF.
    fn take_line(&mut self) -> Result<Option<BytesMut>, ProxyError> {
        match self.buffered.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => {
                let mut line = self.buffered.split_to(pos + 2);
                line.truncate(pos);
                Ok(Some(line))
            }
            None if self.buffered.len() > self.read_size.max(4096) => Err(self.fail(
                ProxyError::UpstreamParse("chunk header line too long".into()),
            )),
            None => Ok(None),
        }
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        if let Some(io) = self.io.take() {
            tracing::debug!(
                connection_id = %io.id(),
                received = self.received,
                "Upstream body abandoned before completion"
            );
        }
    }
}

/// A TLS peer that closes without `close_notify` surfaces as
/// `UnexpectedEof`; treat it as a plain close. The decoders decide whether
/// the close came too early.
fn end_of_stream_as_zero(read: std::io::Result<usize>) -> std::io::Result<usize> {
    match read {
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
        other => other,
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProxyError> {
    let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    std::str::from_utf8(size)
        .ok()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            ProxyError::UpstreamParse(format!(
                "bad chunk size line: {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}
