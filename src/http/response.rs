//! Delivery adapter: renders a `RawResponse` for the client.
//!
//! # Responsibilities
//! - Streaming mode: pipe the upstream body chunk by chunk
//! - Buffered mode: materialize the body and send one complete response
//! - Apply the same CORS headers in both modes
//!
//! # Design Decisions
//! - Streaming never buffers beyond the current chunk
//! - Once streamed headers are out, an upstream error aborts the transfer;
//!   it never turns into a second (JSON) response
//! - Buffered mode recomputes Content-Length from the actual body

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use futures_util::TryStreamExt;

use crate::config::DeliveryMode;
use crate::error::ProxyError;
use crate::proxy::headers::apply_cors;
use crate::upstream::RawResponse;

fn is_bodiless(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Render `raw` in the requested mode.
///
/// Only buffered mode can fail here (while collecting the body); streaming
/// errors surface later as an aborted body.
pub async fn deliver(raw: RawResponse, mode: DeliveryMode) -> Result<Response<Body>, ProxyError> {
    let RawResponse {
        status,
        mut headers,
        body,
        transport,
        ..
    } = raw;
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONTENT_LENGTH);

    let body = match mode {
        DeliveryMode::Streaming => {
            if !is_bodiless(status) {
                headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            let stream = body.into_stream().inspect_err(move |err| {
                tracing::warn!(
                    transport = transport.as_str(),
                    error = %err,
                    "Upstream failed mid-stream; aborting transfer"
                );
            });
            Body::from_stream(stream)
        }
        DeliveryMode::Buffered => {
            let bytes = body.collect().await?;
            if !is_bodiless(status) {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            }
            Body::from(bytes)
        }
    };

    Ok(build(status, headers, body))
}

fn build(status: StatusCode, mut headers: HeaderMap, body: Body) -> Response<Body> {
    apply_cors(&mut headers);
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
