//! Request-to-response proxying.
//!
//! # Data Flow
//! ```text
//! ProxyRequest (request.rs)
//!     → target.rs (normalize the target URL)
//!     → upstream::select_transport (fetch or raw socket)
//!     → headers.rs (outbound header set)
//!     → resilience::run_attempts (timeouts, retries)
//!     → rewrite.rs (Location and playlist rewriting)
//!     → http::response::deliver (streaming or buffered)
//! ```
//!
//! `engine.rs` ties the stages together behind [`ProxyEngine`].

pub mod engine;
pub mod headers;
pub mod request;
pub mod rewrite;
pub mod target;

pub use engine::{ProxyEngine, Transports};
pub use headers::{HeaderPolicy, OutboundHeaders};
pub use request::{ClientKind, InboundHeaders, ProxyRequest};
pub use rewrite::ProxyLinks;
pub use target::{normalize, HostKind, NormalizedTarget};
