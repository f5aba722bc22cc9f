//! Media resource reverse proxy.
//!
//! Fetches a target URL on behalf of a client that cannot reach it directly,
//! over native HTTP fetch or a raw TCP/TLS socket, rewrites redirects and HLS
//! playlists so follow-up requests come back through the proxy, and delivers
//! the result either streamed or fully buffered.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ProxyEngine, ProxyRequest, Transports};
