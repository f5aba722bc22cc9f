//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: the proxy route and `/health`
//! - Wire up middleware (request ID, tracing, panic recovery, timeout)
//! - Translate inbound requests into `ProxyRequest` and hand them to the engine
//! - Serve on a listener until shutdown

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, HeaderName, Request, Response},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{DeliveryMode, ProxyConfig};
use crate::error::ProxyError;
use crate::http::request::{ProxyQuery, RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::proxy::ProxyEngine;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProxyEngine>,
    pub delivery: DeliveryMode,
}

/// HTTP server for the media proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    engine: Arc<ProxyEngine>,
}

impl HttpServer {
    /// Create a server with the real upstream transports.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let engine = Arc::new(ProxyEngine::new(&config)?);
        Ok(Self::with_engine(config, engine))
    }

    /// Create a server around an existing engine.
    pub fn with_engine(config: ProxyConfig, engine: Arc<ProxyEngine>) -> Self {
        let state = AppState {
            engine: Arc::clone(&engine),
            delivery: config.proxy.delivery,
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            engine,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route(&config.proxy.route_path, get(proxy_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), UuidRequestId))
                    .layer(TraceLayer::new_for_http().make_span_with(request_span))
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(CatchPanicLayer::custom(handle_panic))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            route = %self.config.proxy.route_path,
            delivery = ?self.config.proxy.delivery,
            transport_mode = ?self.config.transport.mode,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<ProxyEngine> {
        &self.engine
    }

    /// The fully layered router, for serving elsewhere or in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Span per request; the path is logged without its query string.
fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %request.headers().request_id(),
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Proxy handler: one inbound request, exactly one response.
async fn proxy_handler(
    State(state): State<AppState>,
    query: Result<Query<ProxyQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response<Body> {
    let request = match query {
        Ok(Query(query)) => query.into_request(&headers),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unparsable query string");
            Err(ProxyError::MissingParameter)
        }
    };

    match request {
        Ok(request) => state.engine.handle(request, state.delivery).await,
        Err(err) => {
            tracing::warn!(error = %err, "Rejected proxy request");
            err.into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Request handler panicked");
    ProxyError::Generic("internal error".into()).into_response()
}
