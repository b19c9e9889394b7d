//! Resilient streaming network layer.
//!
//! Everything between the report generator and the chat-completions
//! backend lives here:
//!
//! - [`error`] — [`FetchError`] taxonomy with structural retryability
//!   classification (timeouts/5xx transient, 4xx auth/validation permanent).
//! - [`backoff`] — [`BackoffPolicy`] computing retry eligibility and
//!   exponential delay with jitter. Pure; never retries past `max_attempts`.
//! - [`tracker`] — [`RequestTracker`] registry of in-flight requests with
//!   resume-signal handling, staleness eviction, and a periodic sweep.
//! - [`client`] — [`ResilientClient`] orchestrating timeout, retry, and
//!   resumption for one logical request at a time per id.
//! - [`sse`] — [`SseParser`] turning raw byte chunks into
//!   [`StreamEvent`](sse::StreamEvent) content deltas.

pub mod backoff;
pub mod client;
pub mod error;
pub mod sse;
pub mod tracker;

// Re-export commonly used items at the module level.
pub use backoff::{BackoffDecision, BackoffPolicy};
pub use client::{AlwaysOnline, ConnectivityHint, ResilientClient, ResumeSignal};
pub use error::FetchError;
pub use sse::{SseParser, StreamEvent};
pub use tracker::{CancelToken, RequestOptions, RequestTracker};
