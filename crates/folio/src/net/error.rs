//! Error taxonomy for the resilient fetch client.
//!
//! Errors are classified structurally rather than by substring matching so
//! the backoff policy can make retry decisions without parsing messages.
//! Transient failures (timeouts, transport errors, 5xx) are retryable;
//! auth/validation failures (400/401/403/404/422) and cancellation are not.

use thiserror::Error;

/// Longest HTTP error body snippet carried in a [`FetchError::Http`].
pub const BODY_SNIPPET_MAX: usize = 2048;

/// A failure of a single logical request through the resilient client.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Non-2xx HTTP response. Carries the status and a body snippet.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure (DNS, TLS, connection reset, broken pipe).
    #[error("request failed: {0}")]
    Transport(String),

    /// The per-attempt timeout elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The connectivity hint reported the host offline; no I/O was issued.
    #[error("host is offline")]
    Offline,

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// All retry attempts were consumed by retryable failures.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Build an [`FetchError::Http`] with the body capped to a snippet.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > BODY_SNIPPET_MAX {
            let cut = floor_char_boundary(&body, BODY_SNIPPET_MAX);
            body.truncate(cut);
            body.push_str("...");
        }
        FetchError::Http { status, body }
    }

    /// Whether this failure may succeed on a fresh attempt.
    ///
    /// Network-level failures and 5xx (plus 429) are retryable; the
    /// 400/401/403/404/422 auth/validation class, cancellation, and an
    /// already-exhausted retry loop are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { status, .. } => *status >= 500 || *status == 429,
            FetchError::Transport(_) | FetchError::Timeout | FetchError::Offline => true,
            FetchError::Cancelled | FetchError::RetriesExhausted { .. } => false,
        }
    }

    /// Whether this is a permanent caller-visible failure.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}

/// Largest index `<= max` that falls on a `char` boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
