//! Registry of in-flight requests, supporting resumption and expiry.
//!
//! The [`RequestTracker`] remembers enough about each logical request (URL,
//! options, attempt count, start time) to re-execute it after the host
//! regains connectivity or foreground attention, and to abandon it once it
//! is too old to be worth resuming. A periodic sweep bounds memory by
//! evicting anything older than a hard ceiling regardless of signals.
//!
//! All timestamps use `tokio::time::Instant` so tests can pause and advance
//! the clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Entries older than this are discarded instead of resumed.
pub const RESUME_STALENESS: Duration = Duration::from_secs(60);

/// Entries older than this are dropped by the periodic sweep.
pub const SWEEP_CEILING: Duration = Duration::from_secs(300);

/// How often the background sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The request-shaped data needed to (re-)issue an HTTP call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestOptions {
    pub fn post_json(headers: Vec<(String, String)>, body: String) -> Self {
        Self {
            method: "POST".into(),
            headers,
            body: Some(body),
        }
    }

    pub fn get(headers: Vec<(String, String)>) -> Self {
        Self {
            method: "GET".into(),
            headers,
            body: None,
        }
    }
}

/// Shared cancellation flag for one logical request.
///
/// Cloned into the executing task; flipping it on any clone aborts the
/// in-flight attempt at its next suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested. Cooperative: polls the flag,
    /// so it is only used inside `select!` arms where sub-50ms abort
    /// latency is irrelevant next to network round trips.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// One tracked logical request.
#[derive(Debug, Clone)]
pub struct TrackedRequest {
    pub id: String,
    pub url: String,
    pub options: RequestOptions,
    /// Attempts made so far. Only increases, except the explicit reset
    /// when a resume signal re-adopts the request.
    pub attempts: u32,
    pub started: Instant,
    /// Set while an execution pass owns this entry; guards against a
    /// second concurrent execution for the same id.
    pub executing: bool,
    pub cancel: CancelToken,
}

/// Registry of in-flight requests keyed by request id.
///
/// Cheap to clone; clones share the underlying registry. Mutation only
/// happens between await points under a short-lived lock.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    inner: Arc<Mutex<HashMap<String, TrackedRequest>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, assigning an id when none is supplied.
    ///
    /// At most one entry exists per id: registering an id that is already
    /// tracked returns it unchanged.
    pub fn register(&self, url: &str, options: RequestOptions, id: Option<String>) -> String {
        let id = id.unwrap_or_else(generate_request_id);
        let mut map = self.lock();
        map.entry(id.clone()).or_insert_with(|| {
            debug!("tracking request {id} -> {url}");
            TrackedRequest {
                id: id.clone(),
                url: url.to_string(),
                options,
                attempts: 0,
                started: Instant::now(),
                executing: false,
                cancel: CancelToken::new(),
            }
        });
        id
    }

    /// Remove a request on terminal success or failure.
    pub fn deregister(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            debug!("request {id} deregistered");
        }
    }

    /// Cancel a request: flip its token and remove it so no later resume
    /// signal can re-execute it.
    pub fn cancel(&self, id: &str) {
        if let Some(entry) = self.lock().remove(id) {
            entry.cancel.cancel();
            info!("request {id} cancelled");
        }
    }

    /// The cancellation token for a tracked request, if present.
    pub fn cancel_token(&self, id: &str) -> Option<CancelToken> {
        self.lock().get(id).map(|e| e.cancel.clone())
    }

    /// Snapshot of everything currently tracked.
    pub fn list_in_flight(&self) -> Vec<TrackedRequest> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Handle a resume signal (tab foregrounded, connectivity restored).
    ///
    /// Requests older than `staleness` are discarded as abandoned; the
    /// survivors get their attempt count reset to 0 and their ids are
    /// returned for re-execution. Entries mid-execution are left alone —
    /// their own retry loop is still driving them.
    pub fn take_resumable(&self, staleness: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut map = self.lock();

        let stale: Vec<String> = map
            .values()
            .filter(|e| !e.executing && now.duration_since(e.started) > staleness)
            .map(|e| e.id.clone())
            .collect();
        for id in &stale {
            info!("discarding stale request {id} (older than {staleness:?})");
            map.remove(id);
        }

        let mut resumable = Vec::new();
        for entry in map.values_mut() {
            if !entry.executing {
                entry.attempts = 0;
                resumable.push(entry.id.clone());
            }
        }
        resumable
    }

    /// Drop entries older than `ceiling` regardless of resume signals.
    /// Entries mid-execution are exempt; their own retry loop still owns
    /// them. Returns the number of evicted entries.
    pub fn sweep(&self, ceiling: Duration) -> usize {
        let now = Instant::now();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|id, e| {
            let keep = e.executing || now.duration_since(e.started) <= ceiling;
            if !keep {
                info!("sweeping abandoned request {id}");
            }
            keep
        });
        before - map.len()
    }

    /// Spawn the periodic sweeper. The handle can be aborted on shutdown.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                tracker.sweep(SWEEP_CEILING);
            }
        })
    }

    /// Mark an entry as executing, returning a snapshot of what to run.
    /// Returns `None` when the id is unknown or already executing, which
    /// enforces the one-execution-per-id rule.
    pub(crate) fn begin_execution(&self, id: &str) -> Option<TrackedRequest> {
        let mut map = self.lock();
        let entry = map.get_mut(id)?;
        if entry.executing {
            return None;
        }
        entry.executing = true;
        Some(entry.clone())
    }

    /// Clear the executing flag after an execution pass finishes.
    pub(crate) fn end_execution(&self, id: &str) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.executing = false;
        }
    }

    /// Record one more attempt, returning the new count. Unknown ids count
    /// from the caller's perspective only (entry may have been swept).
    pub(crate) fn bump_attempts(&self, id: &str) -> Option<u32> {
        let mut map = self.lock();
        let entry = map.get_mut(id)?;
        entry.attempts += 1;
        Some(entry.attempts)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedRequest>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Generate a collision-improbable request id (timestamp + counter).
pub fn generate_request_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{ts:x}-{count:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> RequestOptions {
        RequestOptions::post_json(vec![], "{}".into())
    }

    #[test]
    fn request_ids_are_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req-"));
    }

    #[tokio::test]
    async fn register_assigns_id_and_tracks_once() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x/y", opts(), None);
        assert!(tracker.contains(&id));

        // Re-registering the same id must not create a second entry.
        let same = tracker.register("http://x/y", opts(), Some(id.clone()));
        assert_eq!(same, id);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn deregister_removes_entry() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x", opts(), None);
        tracker.deregister(&id);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_is_not_resumable() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x", opts(), None);
        let token = tracker.cancel_token(&id).unwrap();

        tracker.cancel(&id);
        assert!(token.is_cancelled());
        assert!(!tracker.contains(&id));

        let resumable = tracker.take_resumable(RESUME_STALENESS);
        assert!(resumable.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_resets_attempts_and_evicts_stale() {
        let tracker = RequestTracker::new();
        let fresh = tracker.register("http://fresh", opts(), None);
        tracker.bump_attempts(&fresh);
        tracker.bump_attempts(&fresh);

        tokio::time::advance(Duration::from_secs(90)).await;
        let stale_by_now = fresh.clone();
        let young = tracker.register("http://young", opts(), None);

        let resumable = tracker.take_resumable(RESUME_STALENESS);
        assert_eq!(resumable, vec![young.clone()]);
        assert!(!tracker.contains(&stale_by_now));

        let entry = tracker
            .list_in_flight()
            .into_iter()
            .find(|e| e.id == young)
            .unwrap();
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn executing_entries_are_left_alone_by_resume() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x", opts(), None);
        tracker.begin_execution(&id).unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        let resumable = tracker.take_resumable(RESUME_STALENESS);
        assert!(resumable.is_empty());
        assert!(tracker.contains(&id), "executing entry must not be evicted");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_past_hard_ceiling() {
        let tracker = RequestTracker::new();
        let old = tracker.register("http://old", opts(), None);
        tokio::time::advance(Duration::from_secs(301)).await;
        let new = tracker.register("http://new", opts(), None);

        let evicted = tracker.sweep(SWEEP_CEILING);
        assert_eq!(evicted, 1);
        assert!(!tracker.contains(&old));
        assert!(tracker.contains(&new));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_spares_entries_mid_execution() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x", opts(), None);
        tracker.begin_execution(&id).unwrap();

        tokio::time::advance(SWEEP_CEILING + Duration::from_secs(1)).await;
        assert_eq!(tracker.sweep(SWEEP_CEILING), 0);
        assert!(tracker.contains(&id), "executing entry must survive the sweep");

        // Once execution ends the entry is fair game again.
        tracker.end_execution(&id);
        assert_eq!(tracker.sweep(SWEEP_CEILING), 1);
        assert!(!tracker.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_evicts_without_resume_signal() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x", opts(), None);
        let handle = tracker.spawn_sweeper();
        // Let the sweeper install its interval before moving the clock,
        // otherwise its first tick lands after the advance and the
        // sweeping tick never fires.
        tokio::task::yield_now().await;

        tokio::time::advance(SWEEP_CEILING + SWEEP_INTERVAL + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(!tracker.contains(&id));
        handle.abort();
    }

    #[test]
    fn begin_execution_is_exclusive() {
        let tracker = RequestTracker::new();
        let id = tracker.register("http://x", opts(), None);
        assert!(tracker.begin_execution(&id).is_some());
        assert!(tracker.begin_execution(&id).is_none());

        tracker.end_execution(&id);
        assert!(tracker.begin_execution(&id).is_some());
    }
}
