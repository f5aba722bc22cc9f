//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine, transports, server:
//!     → logging.rs (structured log events, request id from the HTTP layer)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request span
//! - Metrics are cheap (atomic increments) and off by default

pub mod logging;
pub mod metrics;
