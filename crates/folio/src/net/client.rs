//! Resilient fetch client: timeout enforcement, retry with backoff, and
//! resumption of tracked requests.
//!
//! [`ResilientClient::fetch_with_retry`] drives one logical request through
//! the `Idle -> Registered -> Executing -> {Succeeded, Retrying, Failed}`
//! lifecycle: each attempt is bounded by a hard timeout, failures are
//! classified by the [`BackoffPolicy`], and transient ones are re-issued
//! after the computed delay. [`ResilientClient::resume`] re-executes
//! requests the [`RequestTracker`] still holds after a visibility or
//! connectivity signal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::error::FetchError;
use super::tracker::{RESUME_STALENESS, RequestOptions, RequestTracker, TrackedRequest};

/// Hard per-attempt timeout.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// A hint about whether the host currently has network connectivity.
///
/// When the hint reports offline, the client fails the attempt immediately
/// (retryably) instead of making a doomed round trip. The default hint
/// always reports online; hosts with a real signal (netlink watcher,
/// portal check) inject their own.
pub trait ConnectivityHint: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Default hint: assume the network is reachable.
#[derive(Debug, Default)]
pub struct AlwaysOnline;

impl ConnectivityHint for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// The kind of external signal that triggered a resumption pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSignal {
    /// The application returned to the foreground.
    Visibility,
    /// Network connectivity was restored.
    Connectivity,
}

/// HTTP client wrapper that retries transient failures and tracks
/// in-flight requests for resumption.
#[derive(Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    tracker: RequestTracker,
    policy: BackoffPolicy,
    connectivity: Arc<dyn ConnectivityHint>,
    attempt_timeout: Duration,
}

impl ResilientClient {
    pub fn new(tracker: RequestTracker, policy: BackoffPolicy) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent("folio/0.3")
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            tracker,
            policy,
            connectivity: Arc::new(AlwaysOnline),
            attempt_timeout: ATTEMPT_TIMEOUT,
        })
    }

    /// Replace the connectivity hint.
    pub fn with_connectivity(mut self, hint: Arc<dyn ConnectivityHint>) -> Self {
        self.connectivity = hint;
        self
    }

    /// Override the per-attempt timeout (tests use short values).
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Issue a request, retrying transient failures per the backoff policy.
    ///
    /// Registers the request with the tracker for the duration of the call
    /// (under `id` if supplied) and deregisters it on any terminal outcome.
    /// Returns the response with its body unread.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        options: RequestOptions,
        id: Option<String>,
    ) -> Result<reqwest::Response, FetchError> {
        let id = self.tracker.register(url, options, id);
        let result = self.execute(&id).await;
        self.tracker.deregister(&id);
        result
    }

    /// Cancel a tracked request: aborts the in-flight attempt and removes
    /// the entry so a later resume signal cannot re-execute it.
    pub fn cancel(&self, id: &str) {
        self.tracker.cancel(id);
    }

    /// Re-execute every request still tracked after an external resume
    /// signal, discarding stale ones. Requests run one at a time; the
    /// tracker never permits two executions of the same id, and a single
    /// control path here keeps ordering trivial.
    pub async fn resume(&self, signal: ResumeSignal) -> Vec<(String, Result<reqwest::Response, FetchError>)> {
        let ids = self.tracker.take_resumable(RESUME_STALENESS);
        if !ids.is_empty() {
            info!("resume signal {signal:?}: re-executing {} request(s)", ids.len());
        }
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.execute(&id).await;
            self.tracker.deregister(&id);
            outcomes.push((id, result));
        }
        outcomes
    }

    /// Execute a request that was registered ahead of time. The report
    /// task registers before spawning so cancellation has a target from
    /// the very first moment. Deregisters on any terminal outcome.
    pub(crate) async fn execute_registered(
        &self,
        id: &str,
    ) -> Result<reqwest::Response, FetchError> {
        let result = self.execute(id).await;
        self.tracker.deregister(id);
        result
    }

    /// Run the attempt loop for a registered request.
    async fn execute(&self, id: &str) -> Result<reqwest::Response, FetchError> {
        let Some(entry) = self.tracker.begin_execution(id) else {
            // Unknown id (cancelled or swept) or already executing.
            return Err(FetchError::Cancelled);
        };
        let result = self.attempt_loop(&entry).await;
        self.tracker.end_execution(id);
        result
    }

    async fn attempt_loop(&self, entry: &TrackedRequest) -> Result<reqwest::Response, FetchError> {
        loop {
            if entry.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let error = match self.attempt(entry).await {
                Ok(resp) => {
                    debug!("request {} succeeded: HTTP {}", entry.id, resp.status());
                    return Ok(resp);
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => e,
            };

            let attempts = self.tracker.bump_attempts(&entry.id).unwrap_or(u32::MAX);
            let decision = self.policy.decide(&error, attempts);
            if !decision.should_retry {
                warn!(
                    "request {} failed terminally after {attempts} attempt(s): {error}",
                    entry.id
                );
                return if error.is_retryable() {
                    Err(FetchError::RetriesExhausted {
                        attempts,
                        last: Box::new(error),
                    })
                } else {
                    Err(error)
                };
            }

            warn!(
                "request {} attempt {attempts} failed ({error}); retrying in {:?}",
                entry.id, decision.delay
            );
            tokio::select! {
                _ = tokio::time::sleep(decision.delay) => {}
                _ = entry.cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
    }

    /// One execution attempt: connectivity check, bounded send, status
    /// classification.
    async fn attempt(&self, entry: &TrackedRequest) -> Result<reqwest::Response, FetchError> {
        if !self.connectivity.is_online() {
            debug!("request {}: connectivity hint reports offline", entry.id);
            return Err(FetchError::Offline);
        }

        let request = self.build_request(&entry.url, &entry.options)?;
        let send = tokio::time::timeout(self.attempt_timeout, request.send());

        let response = tokio::select! {
            outcome = send => match outcome {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => return Err(FetchError::Transport(e.to_string())),
                Err(_) => return Err(FetchError::Timeout),
            },
            _ = entry.cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // Drain the body into the error so the caller sees a snippet.
        let body = response.text().await.unwrap_or_default();
        Err(FetchError::http(status.as_u16(), body))
    }

    fn build_request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::RequestBuilder, FetchError> {
        let method: reqwest::Method = options
            .method
            .parse()
            .map_err(|_| FetchError::Transport(format!("invalid method {:?}", options.method)))?;
        let mut request = self.http.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlaggedConnectivity(AtomicBool);

    impl ConnectivityHint for FlaggedConnectivity {
        fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn client(policy: BackoffPolicy) -> ResilientClient {
        ResilientClient::new(RequestTracker::new(), policy).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn offline_fails_without_network_io() {
        let hint = Arc::new(FlaggedConnectivity(AtomicBool::new(false)));
        let client = client(BackoffPolicy {
            jitter: false,
            ..BackoffPolicy::with_max_attempts(2)
        })
        .with_connectivity(hint);

        // Unroutable URL: if the client ignored the hint, this would be a
        // transport error, not RetriesExhausted{ last: Offline }.
        let err = client
            .fetch_with_retry("http://127.0.0.1:9/", RequestOptions::get(vec![]), None)
            .await
            .unwrap_err();
        match err {
            FetchError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, FetchError::Offline));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(client.tracker().is_empty(), "terminal failure must deregister");
    }

    #[tokio::test]
    async fn cancelled_before_execution_returns_cancelled() {
        let client = client(BackoffPolicy::default());
        let id = client
            .tracker()
            .register("http://127.0.0.1:9/", RequestOptions::get(vec![]), None);
        client.cancel(&id);

        let err = client.execute(&id).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn resume_after_cancel_is_a_no_op() {
        let client = client(BackoffPolicy::default());
        let id = client
            .tracker()
            .register("http://127.0.0.1:9/", RequestOptions::get(vec![]), None);
        client.cancel(&id);

        let outcomes = client.resume(ResumeSignal::Visibility).await;
        assert!(outcomes.is_empty());
    }
}
