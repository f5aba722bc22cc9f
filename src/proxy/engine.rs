//! The proxy engine: one entry point from request to delivered response.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;

use crate::config::{DeliveryMode, ProxyConfig, RetryConfig, TransportConfig, TransportMode};
use crate::error::ProxyError;
use crate::http::response::deliver;
use crate::net::{ConnectionTracker, Connector, TcpConnector};
use crate::observability::metrics;
use crate::proxy::headers::{strip_upstream_headers, HeaderPolicy, OutboundHeaders};
use crate::proxy::request::ProxyRequest;
use crate::proxy::rewrite::{
    apply_playlist_headers, is_playlist, rewrite_location, rewrite_playlist, ProxyLinks,
};
use crate::proxy::target::{normalize, NormalizedTarget};
use crate::resilience::{run_attempts, AttemptTimeouts, RetryPolicy, TimeoutPolicy};
use crate::upstream::fetch::fetch_attempt;
use crate::upstream::{
    framer, select_transport, Fetcher, FramerLimits, RawResponse, ReqwestFetcher, ResponseBody,
    TransportKind,
};

/// Transport capabilities of the execution context.
#[derive(Debug, Clone, Default)]
pub struct Transports {
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub connector: Option<Arc<dyn Connector>>,
}

impl Transports {
    /// Build the real transports the configured mode allows.
    pub fn from_config(config: &TransportConfig) -> Result<Self, ProxyError> {
        let fetcher: Option<Arc<dyn Fetcher>> = match config.mode {
            TransportMode::SocketOnly => None,
            _ => Some(Arc::new(
                ReqwestFetcher::new(config.accept_invalid_certs)
                    .map_err(|e| ProxyError::Generic(format!("fetch client: {}", e)))?,
            )),
        };
        let connector: Option<Arc<dyn Connector>> = match config.mode {
            TransportMode::FetchOnly => None,
            _ => Some(Arc::new(
                TcpConnector::new(config.accept_invalid_certs)
                    .map_err(|e| ProxyError::Generic(format!("tls config: {}", e)))?,
            )),
        };
        Ok(Self { fetcher, connector })
    }
}

/// Proxies one request at a time; shared freely across tasks.
#[derive(Debug)]
pub struct ProxyEngine {
    mode: TransportMode,
    route_path: String,
    headers: HeaderPolicy,
    timeouts: TimeoutPolicy,
    retries: RetryConfig,
    limits: FramerLimits,
    transports: Transports,
    tracker: ConnectionTracker,
}

impl ProxyEngine {
    /// Engine with the real transports for `config`.
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let transports = Transports::from_config(&config.transport)?;
        Ok(Self::with_transports(config, transports))
    }

    /// Engine with injected transports.
    pub fn with_transports(config: &ProxyConfig, transports: Transports) -> Self {
        Self {
            mode: config.transport.mode,
            route_path: config.proxy.route_path.clone(),
            headers: HeaderPolicy::new(&config.proxy),
            timeouts: TimeoutPolicy::new(&config.timeouts, &config.retries),
            retries: config.retries.clone(),
            limits: FramerLimits::from(&config.transport),
            transports,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Number of raw upstream sockets currently open.
    pub fn open_sockets(&self) -> u64 {
        self.tracker.open_count()
    }

    /// Fetch, retry and rewrite; the body may still be streaming from upstream.
    pub async fn proxy(&self, request: &ProxyRequest) -> Result<RawResponse, ProxyError> {
        let target = normalize(request.target())?;
        let transport = select_transport(
            &target,
            self.mode,
            self.transports.fetcher.is_some(),
            self.transports.connector.is_some(),
        )?;
        let outbound = self.headers.outbound(request, &target);
        let policy = RetryPolicy::for_transport(transport, &self.retries);

        tracing::debug!(
            upstream = %target.log_label(),
            transport = %transport,
            host_kind = ?target.kind(),
            max_attempts = policy.max_attempts(),
            "Proxying upstream request"
        );

        let target_ref = &target;
        let outbound_ref = &outbound;
        let (result, attempts) = run_attempts(
            policy,
            &self.timeouts,
            target.is_playlist_path(),
            move |_, timeouts| self.attempt(transport, target_ref, outbound_ref, timeouts),
        )
        .await;

        for attempt in &attempts {
            metrics::record_attempt(transport.as_str(), attempt.outcome.as_str());
        }
        if attempts.len() > 1 {
            metrics::record_retries(transport.as_str(), attempts.len() as u64 - 1);
        }

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                let last = attempts.last();
                tracing::error!(
                    upstream = %target.log_label(),
                    transport = %transport,
                    attempts = attempts.len(),
                    connect_timeout_ms = last.map(|a| a.timeouts.connect.as_millis() as u64),
                    download_timeout_ms = last.map(|a| a.timeouts.download.as_millis() as u64),
                    error = %err,
                    "Upstream request failed"
                );
                return Err(err);
            }
        };

        self.rewrite(&mut response, &target, request.referer()).await?;
        Ok(response)
    }

    async fn attempt(
        &self,
        transport: TransportKind,
        target: &NormalizedTarget,
        headers: &OutboundHeaders,
        timeouts: AttemptTimeouts,
    ) -> Result<RawResponse, ProxyError> {
        let unsupported = || ProxyError::UnsupportedTransport {
            host: target.host_header(),
        };
        match transport {
            TransportKind::Fetch => {
                let fetcher = self.transports.fetcher.as_deref().ok_or_else(unsupported)?;
                fetch_attempt(fetcher, target, headers, timeouts).await
            }
            TransportKind::Socket => {
                let connector = self.transports.connector.as_deref().ok_or_else(unsupported)?;
                framer::exchange(connector, &self.tracker, target, headers, timeouts, self.limits)
                    .await
            }
        }
    }

    async fn rewrite(
        &self,
        response: &mut RawResponse,
        target: &NormalizedTarget,
        referer: Option<&str>,
    ) -> Result<(), ProxyError> {
        strip_upstream_headers(&mut response.headers);

        let links = ProxyLinks::new(&self.route_path, referer);
        if response.is_redirect() {
            rewrite_location(response.status, &mut response.headers, target.url(), &links);
        }

        if response.status.is_success() && is_playlist(&response.headers, target) {
            // Content-type playlists were fetched under the segment deadline.
            let limit = self.timeouts.playlist_download();
            let pending = std::mem::replace(&mut response.body, ResponseBody::empty());
            let body = tokio::time::timeout(limit, pending.collect())
                .await
                .map_err(|_| ProxyError::DownloadTimeout(limit))??;
            let rewritten = rewrite_playlist(&String::from_utf8_lossy(&body), target.url(), &links);

            apply_playlist_headers(&mut response.headers);
            if response.status == StatusCode::PARTIAL_CONTENT {
                response.status = StatusCode::OK;
                response.reason = "OK".to_string();
            }
            response.content_range = None;
            response.body = ResponseBody::Buffered(Bytes::from(rewritten));

            tracing::debug!(
                upstream = %target.log_label(),
                original_bytes = body.len(),
                rewritten_bytes = response.body.length().unwrap_or_default(),
                "Playlist rewritten"
            );
        }
        Ok(())
    }

    /// Proxy and deliver. Always produces exactly one response.
    pub async fn handle(&self, request: ProxyRequest, mode: DeliveryMode) -> Response<Body> {
        let started = Instant::now();

        let (response, transport) = match self.proxy(&request).await {
            Ok(raw) => {
                let transport = raw.transport.as_str();
                let response = deliver(raw, mode)
                    .await
                    .unwrap_or_else(IntoResponse::into_response);
                (response, transport)
            }
            Err(err) => (err.into_response(), "none"),
        };

        metrics::record_request(response.status().as_u16(), transport, started);
        tracing::info!(
            status = response.status().as_u16(),
            transport,
            delivery = ?mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            cookie = request.headers().cookie.is_some(),
            authorization = request.headers().authorization.is_some(),
            "Proxy request handled"
        );
        response
    }
}
