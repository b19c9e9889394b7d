//! Retry eligibility and delay computation with exponential backoff.
//!
//! [`BackoffPolicy::decide`] is a pure function of the error and attempt
//! count: it classifies the error as transient or permanent (see
//! [`FetchError::is_retryable`]) and computes an exponential delay with
//! jitter. Logging the decision is the caller's concern.

use std::time::{Duration, SystemTime};

use super::error::FetchError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts allowed per logical request (first try included).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base_delay: Duration,
    /// Ceiling on the computed delay, jitter included.
    pub max_delay: Duration,
    /// Whether to add up to 1s of jitter to prevent retry storms.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter: true,
        }
    }
}

/// The outcome of consulting the policy after a failed attempt.
/// Computed fresh per attempt, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl BackoffDecision {
    fn no_retry() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy allowing the given number of total attempts.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Decide whether the request should be retried after `attempt`
    /// attempts have failed (1-based), and how long to wait first.
    pub fn decide(&self, error: &FetchError, attempt: u32) -> BackoffDecision {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return BackoffDecision::no_retry();
        }
        BackoffDecision {
            should_retry: true,
            delay: self.delay_for_attempt(attempt),
        }
    }

    /// Delay before re-issuing after `attempt` failed attempts (1-based):
    /// `min(base * 2^(attempt-1) + jitter(0..1000ms), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let mut delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        if self.jitter {
            delay += jitter_millis() as f64 / 1000.0;
        }
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// 0..1000ms of jitter from the sub-second clock. Avoids pulling in `rand`
/// for a single call site; simultaneous failures across processes still
/// spread out because their clock phases differ.
fn jitter_millis() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    (nanos / 1000) % 1000
}
