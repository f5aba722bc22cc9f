//! Timeout enforcement.
//!
//! # Responsibilities
//! - Derive the per-attempt connect and download timeouts
//! - Escalate the connect timeout on fetch retries
//! - Pick the shorter download timeout for playlists
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; an elapsed timer drops the in-flight
//!   future, which releases the socket or request it owns
//! - Connect and download timeouts surface as distinct errors (both 504)

use std::time::Duration;

use crate::config::{RetryConfig, TimeoutConfig};

/// Effective timeouts for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    /// Bounds connection establishment (fetch: time to response headers).
    pub connect: Duration,
    /// Bounds connection success to body completion.
    pub download: Duration,
}

/// Per-request timeout policy.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    connect: Duration,
    download: Duration,
    playlist_download: Duration,
    backoff_factor: f64,
}

impl TimeoutPolicy {
    pub fn new(timeouts: &TimeoutConfig, retries: &RetryConfig) -> Self {
        Self {
            connect: timeouts.connect(),
            download: timeouts.download(),
            playlist_download: timeouts.playlist_download(),
            backoff_factor: retries.connect_backoff_factor,
        }
    }

    /// Upper bound on reading a playlist body.
    pub fn playlist_download(&self) -> Duration {
        self.playlist_download
    }

    /// Timeouts for the 1-based `attempt`.
    ///
    /// With `escalate`, the connect timeout is multiplied by the backoff
    /// factor once per previous attempt. The download timeout never escalates.
    pub fn for_attempt(&self, attempt: u32, playlist: bool, escalate: bool) -> AttemptTimeouts {
        let connect = if escalate {
            escalated(self.connect, self.backoff_factor, attempt)
        } else {
            self.connect
        };
        let download = if playlist {
            self.playlist_download
        } else {
            self.download
        };
        AttemptTimeouts { connect, download }
    }
}

/// `base * factor^(attempt - 1)`, rounded to the millisecond.
pub fn escalated(base: Duration, factor: f64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let millis = base.as_millis() as f64 * factor.powi(exponent);
    Duration::from_millis(millis.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy::new(&TimeoutConfig::default(), &RetryConfig::default())
    }

    #[test]
    fn escalates_connect_timeout_per_retry() {
        let p = policy();
        assert_eq!(p.for_attempt(1, false, true).connect, Duration::from_millis(5000));
        assert_eq!(p.for_attempt(2, false, true).connect, Duration::from_millis(7500));
        assert_eq!(p.for_attempt(3, false, true).connect, Duration::from_millis(11250));
    }

    #[test]
    fn download_timeout_never_escalates() {
        let p = policy();
        assert_eq!(p.for_attempt(3, false, true).download, Duration::from_millis(30000));
        assert_eq!(p.for_attempt(1, true, true).download, Duration::from_millis(10000));
        assert_eq!(p.playlist_download(), Duration::from_millis(10000));
    }

    #[test]
    fn socket_attempts_keep_base_connect_timeout() {
        let p = policy();
        assert_eq!(p.for_attempt(2, false, false).connect, Duration::from_millis(5000));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        assert_eq!(
            escalated(Duration::from_millis(100), 1.5, 0),
            Duration::from_millis(100)
        );
    }
}
