//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream attempt:
//!     → timeouts.rs (effective connect/download timeout for this attempt)
//!     → transport (fetch or raw socket) under those deadlines
//!     → On failure: retries.rs (retryable for this transport? delay, next attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Each transport has its own retry rule
//! - A timed-out attempt is dropped, never left half-open

pub mod retries;
pub mod timeouts;

pub use retries::{run_attempts, Attempt, AttemptOutcome, RetryPolicy};
pub use timeouts::{AttemptTimeouts, TimeoutPolicy};
