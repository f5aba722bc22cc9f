//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is retried, per transport
//! - Run the attempt loop and record every attempt
//!
//! # Design Decisions
//! - Fetch retries only connect-class failures, with an escalating
//!   connect timeout and no delay
//! - Socket retries only connection resets, after a fixed delay
//! - A received response, whatever its status, is never retried
//! - Attempts run strictly one after another; the caller only ever sees
//!   the last outcome

use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::RetryConfig;
use crate::error::ProxyError;
use crate::upstream::TransportKind;

use super::timeouts::{AttemptTimeouts, TimeoutPolicy};

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    ConnectTimeout,
    DownloadTimeout,
    ConnectionReset,
    Error,
}

impl AttemptOutcome {
    pub fn of<T>(result: &Result<T, ProxyError>) -> Self {
        match result {
            Ok(_) => AttemptOutcome::Success,
            Err(ProxyError::ConnectTimeout(_)) => AttemptOutcome::ConnectTimeout,
            Err(ProxyError::DownloadTimeout(_)) => AttemptOutcome::DownloadTimeout,
            Err(ProxyError::ConnectionReset) => AttemptOutcome::ConnectionReset,
            Err(_) => AttemptOutcome::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::ConnectTimeout => "connect_timeout",
            AttemptOutcome::DownloadTimeout => "download_timeout",
            AttemptOutcome::ConnectionReset => "connection_reset",
            AttemptOutcome::Error => "error",
        }
    }
}

/// One connection attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based.
    pub number: u32,
    pub started: Instant,
    pub elapsed: Duration,
    pub timeouts: AttemptTimeouts,
    pub outcome: AttemptOutcome,
}

/// Retry rules for one transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// Connect-class failures, escalating connect timeout.
    Fetch { max_retries: u32 },
    /// Connection resets only, after a fixed delay.
    Socket { max_retries: u32, delay: Duration },
}

impl RetryPolicy {
    pub fn for_transport(transport: TransportKind, config: &RetryConfig) -> Self {
        match transport {
            TransportKind::Fetch => RetryPolicy::Fetch {
                max_retries: config.fetch_max_retries,
            },
            TransportKind::Socket => RetryPolicy::Socket {
                max_retries: config.reset_max_retries,
                delay: Duration::from_millis(config.reset_delay_ms),
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::Fetch { max_retries } | RetryPolicy::Socket { max_retries, .. } => {
                max_retries + 1
            }
        }
    }

    /// Whether the connect timeout grows on each retry.
    pub fn escalates(&self) -> bool {
        matches!(self, RetryPolicy::Fetch { .. })
    }

    /// Delay before the next attempt, or `None` when `err` after `attempt`
    /// is final.
    pub fn retry_after(&self, attempt: u32, err: &ProxyError) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        match self {
            RetryPolicy::Fetch { .. } => {
                matches!(err, ProxyError::ConnectTimeout(_)).then_some(Duration::ZERO)
            }
            RetryPolicy::Socket { delay, .. } => err.is_reset().then_some(*delay),
        }
    }
}

/// Run `attempt_fn` until it succeeds or the policy gives up.
///
/// Returns the last result together with the record of every attempt.
pub async fn run_attempts<T, F, Fut>(
    policy: RetryPolicy,
    timeouts: &TimeoutPolicy,
    playlist: bool,
    mut attempt_fn: F,
) -> (Result<T, ProxyError>, Vec<Attempt>)
where
    F: FnMut(u32, AttemptTimeouts) -> Fut,
    Fut: Future<Output = Result<T, ProxyError>>,
{
    let mut attempts = Vec::with_capacity(policy.max_attempts() as usize);
    let mut number = 1;

    loop {
        let effective = timeouts.for_attempt(number, playlist, policy.escalates());
        let started = Instant::now();
        let result = attempt_fn(number, effective).await;

        let outcome = AttemptOutcome::of(&result);
        attempts.push(Attempt {
            number,
            started,
            elapsed: started.elapsed(),
            timeouts: effective,
            outcome,
        });

        let err = match result {
            Ok(value) => return (Ok(value), attempts),
            Err(err) => err,
        };

        match policy.retry_after(number, &err) {
            Some(delay) => {
                tracing::warn!(
                    attempt = number,
                    outcome = outcome.as_str(),
                    connect_timeout_ms = effective.connect.as_millis() as u64,
                    download_timeout_ms = effective.download.as_millis() as u64,
                    retry_in_ms = delay.as_millis() as u64,
                    "Upstream attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                number += 1;
            }
            None => return (Err(err), attempts),
        }
    }
}
