//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace span, panic boundary)
//!     → request.rs (query + headers → ProxyRequest)
//!     → proxy::ProxyEngine (normalize, transport, retries, rewrite)
//!     → response.rs (streaming or buffered delivery, CORS)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ProxyQuery, RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use response::deliver;
pub use server::HttpServer;
