//! The cached backtest/training report.
//!
//! `fetch_training_data` decides between serving the held report, adopting
//! the server's cheap cached snapshot, or paying for a full recompute:
//!
//! 1. held detailed report younger than 12h: serve it, no network
//! 2. server holds a cached snapshot: adopt it
//! 3. recompute requested less than 5 minutes ago: serve the held report
//! 4. any report held at all: serve it, stale data beats an error
//! 5. otherwise (or when forced): recompute
//!
//! A failed refresh never clears a good report. `reconcile` runs in the
//! background and adopts a server snapshot only when it is strictly newer
//! than what is held.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::TrainingBackend;
use crate::connectivity::ConnectivityTracker;
use crate::models::{TrainRequest, TrainingReport};
use crate::notify::Notifier;
use crate::persistence::{revive, PersistedRecord, Persistence};

/// A held detailed report younger than this is served without a network call.
pub const FRESHNESS_HOURS: i64 = 12;

/// Minimum spacing between recompute attempts triggered by ordinary loads.
pub const ANTI_SPAM_MINUTES: i64 = 5;

/// Error shown when the backend could not be reached at all.
const UNREACHABLE_MESSAGE: &str = "Backend unreachable, showing cached data";

/// Which branch `fetch_training_data` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Held report was fresh and detailed; no network.
    Fresh,
    /// Adopted the server's cached snapshot.
    Snapshot,
    /// Inside the anti-spam window; served the held report.
    Throttled,
    /// Served the held stale report rather than risk a recompute.
    Stale,
    /// Recompute succeeded.
    Recomputed,
    /// Recompute failed; see `TrainingCache::error`.
    Failed,
}

/// The held report plus its two clocks: `fetched_at` drives freshness,
/// `last_request_at` drives anti-spam throttling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingCacheEntry {
    pub report: Option<TrainingReport>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl TrainingCacheEntry {
    fn stamped(report: TrainingReport, fetched_at: DateTime<Utc>, requested_at: DateTime<Utc>) -> Self {
        Self {
            report: Some(report),
            fetched_at: Some(fetched_at),
            last_request_at: Some(requested_at),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct TrainingCacheWire {
    #[serde(default)]
    report: Option<TrainingReport>,
    #[serde(default)]
    fetched_at: Option<String>,
    #[serde(default)]
    last_request_at: Option<String>,
}

impl PersistedRecord for TrainingCacheEntry {
    const KEY: &'static str = "training_cache";
    type Wire = TrainingCacheWire;

    fn encode(&self) -> TrainingCacheWire {
        TrainingCacheWire {
            report: self.report.clone(),
            fetched_at: self.fetched_at.as_ref().map(revive::encode_timestamp),
            last_request_at: self.last_request_at.as_ref().map(revive::encode_timestamp),
        }
    }

    fn decode(wire: TrainingCacheWire) -> Self {
        Self {
            report: wire.report,
            fetched_at: revive::revive_opt(wire.fetched_at.as_deref()),
            last_request_at: revive::revive_opt(wire.last_request_at.as_deref()),
        }
    }
}

#[derive(Default)]
struct TrainingState {
    entry: TrainingCacheEntry,
    loading: bool,
    error: Option<String>,
}

/// Sets the loading flag for the duration of a fetch.
struct LoadingGuard<'a> {
    cache: &'a TrainingCache,
}

impl<'a> LoadingGuard<'a> {
    fn start(cache: &'a TrainingCache) -> Self {
        cache.state().loading = true;
        Self { cache }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.cache.state().loading = false;
    }
}

pub struct TrainingCache {
    backend: Arc<dyn TrainingBackend>,
    connectivity: Arc<ConnectivityTracker>,
    persistence: Persistence,
    notifier: Arc<dyn Notifier>,
    league_ids: Vec<String>,
    state: Mutex<TrainingState>,
}

impl TrainingCache {
    /// Create the cache, hydrating the persisted report if there is one.
    pub fn new(
        backend: Arc<dyn TrainingBackend>,
        connectivity: Arc<ConnectivityTracker>,
        persistence: Persistence,
        notifier: Arc<dyn Notifier>,
        league_ids: Vec<String>,
    ) -> Self {
        let entry = persistence
            .read::<TrainingCacheEntry>()
            .unwrap_or_default();
        if let Some(fetched_at) = entry.fetched_at {
            debug!(fetched_at = %fetched_at, "Hydrated training report");
        }

        Self {
            backend,
            connectivity,
            persistence,
            notifier,
            league_ids,
            state: Mutex::new(TrainingState {
                entry,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrainingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Accessors =====

    pub fn report(&self) -> Option<TrainingReport> {
        self.state().entry.report.clone()
    }

    pub fn entry(&self) -> TrainingCacheEntry {
        self.state().entry.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// Message from the last failed recompute, for a non-blocking banner.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn clear_error(&self) {
        self.state().error = None;
    }

    // ===== Operations =====

    /// Make sure a usable report is held, choosing the cheapest source that
    /// satisfies the freshness policy. See the module docs for the order.
    pub async fn fetch_training_data(
        &self,
        force_recalculate: bool,
        days_back: u32,
        start_date: Option<NaiveDate>,
    ) -> FetchOutcome {
        let _loading = LoadingGuard::start(self);

        if !force_recalculate {
            if self.is_fresh(Utc::now()) {
                debug!("Serving fresh training report from cache");
                return FetchOutcome::Fresh;
            }

            if self.try_adopt_snapshot().await {
                return FetchOutcome::Snapshot;
            }

            let state = self.state();
            if state.entry.report.is_some() {
                let now = Utc::now();
                let throttled = state
                    .entry
                    .last_request_at
                    .is_some_and(|at| now - at < Duration::minutes(ANTI_SPAM_MINUTES));
                if throttled {
                    debug!("Recompute requested recently, serving held report");
                    return FetchOutcome::Throttled;
                }
                debug!("Serving stale training report rather than recomputing");
                return FetchOutcome::Stale;
            }
        }

        self.recompute(days_back, start_date).await
    }

    /// Replace the held report with one the caller already has.
    pub fn update_stats(&self, report: TrainingReport) {
        let now = Utc::now();
        let entry = {
            let mut state = self.state();
            state.entry = TrainingCacheEntry::stamped(report, now, now);
            state.error = None;
            state.entry.clone()
        };
        self.persistence.write_debounced(&entry);
    }

    /// Background check for a newer server snapshot. Returns true when one
    /// was adopted. Never sets the error state; failures are only logged.
    pub async fn reconcile(&self) -> bool {
        if self.state().entry.report.is_none() {
            return false;
        }
        if !self.connectivity.is_backend_available() {
            debug!("Skipping reconciliation, backend unavailable");
            return false;
        }

        let snapshot = match self.backend.fetch_cached_snapshot().await {
            Ok(snapshot) => {
                self.connectivity.record_success();
                snapshot
            }
            Err(e) => {
                debug!(error = %e, "Reconciliation fetch failed");
                return false;
            }
        };

        let Some((report, Some(server_time))) = snapshot.into_report() else {
            return false;
        };

        let entry = {
            let mut state = self.state();
            // Compare under the lock; a recompute may have landed meanwhile
            let newer = state
                .entry
                .fetched_at
                .map_or(true, |local| server_time > local);
            if !newer || state.entry.report.is_none() {
                return false;
            }
            state.entry.report = Some(report);
            state.entry.fetched_at = Some(server_time);
            state.entry.clone()
        };

        info!(server_time = %server_time, "Adopted newer training report from server");
        self.persistence.write(&entry);
        true
    }

    /// Drop the held report and its persisted copy.
    pub fn clear_cache(&self) {
        {
            let mut state = self.state();
            state.entry = TrainingCacheEntry::default();
            state.error = None;
        }
        self.persistence.remove::<TrainingCacheEntry>();
        info!("Training cache cleared");
    }

    // ===== Decision tree steps =====

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let state = self.state();
        match (&state.entry.report, state.entry.fetched_at) {
            (Some(report), Some(fetched_at)) => {
                report.is_detailed() && now - fetched_at < Duration::hours(FRESHNESS_HOURS)
            }
            _ => false,
        }
    }

    /// Adopt the server's cached result if it has one. Any failure, including
    /// "nothing cached yet", just falls through.
    async fn try_adopt_snapshot(&self) -> bool {
        let snapshot = match self.backend.fetch_cached_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.connectivity.record_failure(&e);
                debug!(error = %e, "Cached snapshot unavailable");
                return false;
            }
        };
        self.connectivity.record_success();

        let Some((report, server_time)) = snapshot.into_report() else {
            debug!("Server holds no cached training result");
            return false;
        };

        let now = Utc::now();
        let entry = {
            let mut state = self.state();
            state.entry = TrainingCacheEntry::stamped(report, server_time.unwrap_or(now), now);
            state.error = None;
            state.entry.clone()
        };
        info!("Adopted cached training report from server");
        self.persistence.write_debounced(&entry);
        true
    }

    async fn recompute(&self, days_back: u32, start_date: Option<NaiveDate>) -> FetchOutcome {
        let request = TrainRequest {
            league_ids: self.league_ids.clone(),
            days_back,
            start_date,
            reset_weights: false,
        };
        info!(days_back, leagues = request.league_ids.len(), "Starting training run");

        match self.backend.train(&request).await {
            Ok(report) => {
                self.connectivity.record_success();
                let summary = report.summary();
                let now = Utc::now();
                let entry = {
                    let mut state = self.state();
                    state.entry = TrainingCacheEntry::stamped(report, now, now);
                    state.error = None;
                    state.entry.clone()
                };
                self.persistence.write_debounced(&entry);
                info!(summary = %summary, "Training run complete");

                if self.notifier.permission_granted() {
                    self.notifier.notify("Training complete", &summary);
                }
                FetchOutcome::Recomputed
            }
            Err(e) => {
                self.connectivity.record_failure(&e);
                let message = if e.is_transport() {
                    UNREACHABLE_MESSAGE.to_string()
                } else {
                    format!("Training failed: {}", e)
                };
                warn!(error = %e, "Training run failed, keeping held report");
                self.state().error = Some(message);
                FetchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::models::CachedSnapshot;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct FakeTraining {
        snapshot_calls: AtomicUsize,
        train_calls: AtomicUsize,
        snapshot: Mutex<Result<CachedSnapshot, ApiError>>,
        train: Mutex<Result<TrainingReport, ApiError>>,
        train_gate: Option<Arc<Notify>>,
        last_request: Mutex<Option<TrainRequest>>,
    }

    impl FakeTraining {
        fn new() -> Self {
            Self {
                snapshot_calls: AtomicUsize::new(0),
                train_calls: AtomicUsize::new(0),
                snapshot: Mutex::new(Ok(CachedSnapshot::default())),
                train: Mutex::new(Ok(detailed_report(5.0))),
                train_gate: None,
                last_request: Mutex::new(None),
            }
        }

        fn with_snapshot(self, result: Result<CachedSnapshot, ApiError>) -> Self {
            *self.snapshot.lock().unwrap() = result;
            self
        }

        fn with_train(self, result: Result<TrainingReport, ApiError>) -> Self {
            *self.train.lock().unwrap() = result;
            self
        }

        fn snapshot_calls(&self) -> usize {
            self.snapshot_calls.load(Ordering::SeqCst)
        }

        fn train_calls(&self) -> usize {
            self.train_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrainingBackend for FakeTraining {
        async fn fetch_cached_snapshot(&self) -> Result<CachedSnapshot, ApiError> {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            self.snapshot.lock().unwrap().clone()
        }

        async fn train(&self, request: &TrainRequest) -> Result<TrainingReport, ApiError> {
            self.train_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if let Some(gate) = &self.train_gate {
                gate.notified().await;
            }
            self.train.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        granted: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn permission_granted(&self) -> bool {
            self.granted
        }

        fn notify(&self, title: &str, body: &str) {
            self.sent.lock().unwrap().push((title.to_string(), body.to_string()));
        }
    }

    fn detailed_report(roi: f64) -> TrainingReport {
        TrainingReport {
            roi: Some(roi),
            accuracy: Some(55.5),
            match_history: vec![json!({"match_id": "m1"})],
            ..Default::default()
        }
    }

    fn thin_report() -> TrainingReport {
        TrainingReport {
            roi: Some(1.0),
            ..Default::default()
        }
    }

    fn cached(report: TrainingReport, at: Option<DateTime<Utc>>) -> CachedSnapshot {
        CachedSnapshot {
            cached: true,
            data: Some(report),
            last_update: at,
        }
    }

    struct Harness {
        cache: TrainingCache,
        backend: Arc<FakeTraining>,
        connectivity: Arc<ConnectivityTracker>,
        notifier: Arc<RecordingNotifier>,
        persistence: Persistence,
    }

    fn harness(backend: FakeTraining) -> Harness {
        let backend = Arc::new(backend);
        let connectivity = Arc::new(ConnectivityTracker::new());
        let notifier = Arc::new(RecordingNotifier {
            granted: true,
            ..Default::default()
        });
        let persistence = Persistence::in_memory();
        let cache = TrainingCache::new(
            backend.clone(),
            connectivity.clone(),
            persistence.clone(),
            notifier.clone(),
            vec!["39".to_string(), "140".to_string()],
        );
        Harness {
            cache,
            backend,
            connectivity,
            notifier,
            persistence,
        }
    }

    fn seed(cache: &TrainingCache, report: TrainingReport, fetched_ago: Duration, requested_ago: Option<Duration>) {
        let now = Utc::now();
        cache.state().entry = TrainingCacheEntry {
            report: Some(report),
            fetched_at: Some(now - fetched_ago),
            last_request_at: requested_ago.map(|ago| now - ago),
        };
    }

    #[tokio::test]
    async fn test_fresh_detailed_report_skips_network() {
        let h = harness(FakeTraining::new());
        seed(&h.cache, detailed_report(3.0), Duration::hours(1), None);
        let before = h.cache.entry();

        let outcome = h.cache.fetch_training_data(false, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Fresh);
        assert_eq!(h.backend.snapshot_calls(), 0);
        assert_eq!(h.backend.train_calls(), 0);
        assert_eq!(h.cache.entry(), before);
        assert!(!h.cache.is_loading());
    }

    #[tokio::test]
    async fn test_thin_report_does_not_satisfy_fast_path() {
        let h = harness(FakeTraining::new());
        seed(&h.cache, thin_report(), Duration::hours(1), None);

        let outcome = h.cache.fetch_training_data(false, 30, None).await;

        assert_eq!(h.backend.snapshot_calls(), 1);
        assert_eq!(outcome, FetchOutcome::Stale);
        assert_eq!(h.backend.train_calls(), 0);
    }

    #[tokio::test]
    async fn test_old_report_consults_snapshot_and_adopts_it() {
        let server_time = Utc::now() - Duration::minutes(20);
        let h = harness(
            FakeTraining::new().with_snapshot(Ok(cached(detailed_report(9.0), Some(server_time)))),
        );
        seed(&h.cache, detailed_report(1.0), Duration::hours(13), None);

        let outcome = h.cache.fetch_training_data(false, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Snapshot);
        assert_eq!(h.cache.report().unwrap().roi, Some(9.0));
        let entry = h.cache.entry();
        assert_eq!(entry.fetched_at, Some(server_time));
        assert!(entry.last_request_at.is_some());
        assert_eq!(h.backend.train_calls(), 0);
        assert!(h.connectivity.last_sync_at().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_without_server_time_uses_now() {
        let h = harness(FakeTraining::new().with_snapshot(Ok(cached(detailed_report(2.0), None))));

        let outcome = h.cache.fetch_training_data(false, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Snapshot);
        let age = Utc::now() - h.cache.entry().fetched_at.unwrap();
        assert!(age < Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_anti_spam_window_blocks_recompute() {
        let h = harness(
            FakeTraining::new().with_snapshot(Err(ApiError::Unreachable("refused".into()))),
        );
        seed(&h.cache, detailed_report(1.0), Duration::hours(20), Some(Duration::minutes(1)));

        let outcome = h.cache.fetch_training_data(false, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Throttled);
        assert_eq!(h.backend.train_calls(), 0);
        assert_eq!(h.cache.report().unwrap().roi, Some(1.0));
    }

    #[tokio::test]
    async fn test_stale_report_preferred_over_recompute() {
        // Outside the anti-spam window, server has nothing cached
        let h = harness(FakeTraining::new());
        seed(&h.cache, detailed_report(1.0), Duration::days(3), Some(Duration::hours(2)));

        let outcome = h.cache.fetch_training_data(false, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Stale);
        assert_eq!(h.backend.train_calls(), 0);
        assert!(h.cache.error().is_none());
    }

    #[tokio::test]
    async fn test_empty_cache_recomputes_and_notifies() {
        let h = harness(FakeTraining::new().with_train(Ok(detailed_report(7.26))));

        let outcome = h.cache.fetch_training_data(false, 60, NaiveDate::from_ymd_opt(2024, 8, 1)).await;

        assert_eq!(outcome, FetchOutcome::Recomputed);
        assert_eq!(h.backend.snapshot_calls(), 1);
        assert_eq!(h.backend.train_calls(), 1);
        let entry = h.cache.entry();
        assert!(entry.fetched_at.is_some());
        assert_eq!(entry.fetched_at, entry.last_request_at);

        let request = h.backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.league_ids, vec!["39", "140"]);
        assert_eq!(request.days_back, 60);
        assert!(!request.reset_weights);

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("ROI +7.3%"));
    }

    #[tokio::test]
    async fn test_no_notification_without_permission() {
        let backend = Arc::new(FakeTraining::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = TrainingCache::new(
            backend,
            Arc::new(ConnectivityTracker::new()),
            Persistence::in_memory(),
            notifier.clone(),
            vec![],
        );

        assert_eq!(cache.fetch_training_data(true, 30, None).await, FetchOutcome::Recomputed);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forced_recompute_skips_snapshot_and_fast_path() {
        let h = harness(FakeTraining::new());
        seed(&h.cache, detailed_report(1.0), Duration::minutes(5), Some(Duration::minutes(1)));

        let outcome = h.cache.fetch_training_data(true, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Recomputed);
        assert_eq!(h.backend.snapshot_calls(), 0);
        assert_eq!(h.backend.train_calls(), 1);
        assert_eq!(h.cache.report().unwrap().roi, Some(5.0));
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_report_and_marks_offline() {
        let h = harness(
            FakeTraining::new().with_train(Err(ApiError::Timeout("train".into()))),
        );
        seed(&h.cache, detailed_report(4.0), Duration::days(2), None);

        let outcome = h.cache.fetch_training_data(true, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Failed);
        assert_eq!(h.cache.report().unwrap().roi, Some(4.0));
        assert!(!h.connectivity.is_backend_available());
        assert_eq!(h.cache.error().as_deref(), Some(UNREACHABLE_MESSAGE));
        assert!(!h.cache.is_loading());
    }

    #[tokio::test]
    async fn test_application_failure_sets_message_and_stays_online() {
        let h = harness(
            FakeTraining::new().with_train(Err(ApiError::ServerError("model crashed".into()))),
        );

        let outcome = h.cache.fetch_training_data(true, 30, None).await;

        assert_eq!(outcome, FetchOutcome::Failed);
        assert!(h.cache.report().is_none());
        assert!(h.connectivity.is_backend_available());
        assert!(h.cache.error().unwrap().starts_with("Training failed:"));
    }

    #[tokio::test]
    async fn test_successful_recompute_clears_previous_error() {
        let h = harness(FakeTraining::new().with_train(Err(ApiError::Timeout("train".into()))));
        h.cache.fetch_training_data(true, 30, None).await;
        assert!(h.cache.error().is_some());

        *h.backend.train.lock().unwrap() = Ok(detailed_report(2.0));
        h.cache.fetch_training_data(true, 30, None).await;
        assert!(h.cache.error().is_none());
    }

    #[tokio::test]
    async fn test_loading_flag_spans_recompute() {
        let gate = Arc::new(Notify::new());
        let mut backend = FakeTraining::new();
        backend.train_gate = Some(gate.clone());
        let h = harness(backend);

        let observe = async {
            tokio::task::yield_now().await;
            let loading = h.cache.is_loading();
            gate.notify_one();
            loading
        };
        let (outcome, was_loading) =
            tokio::join!(h.cache.fetch_training_data(true, 30, None), observe);

        assert!(was_loading);
        assert_eq!(outcome, FetchOutcome::Recomputed);
        assert!(!h.cache.is_loading());
    }

    #[test]
    fn test_update_stats_stamps_both_clocks() {
        let h = harness(FakeTraining::new());
        h.cache.update_stats(thin_report());

        let entry = h.cache.entry();
        assert_eq!(entry.report, Some(thin_report()));
        assert!(entry.fetched_at.is_some());
        assert_eq!(entry.fetched_at, entry.last_request_at);
        // Written through (no runtime, so immediately)
        assert!(h.persistence.read::<TrainingCacheEntry>().is_some());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_strictly_newer_snapshot() {
        let server_time = Utc::now() - Duration::minutes(30);
        let h = harness(
            FakeTraining::new().with_snapshot(Ok(cached(detailed_report(8.0), Some(server_time)))),
        );
        seed(&h.cache, detailed_report(1.0), Duration::hours(2), Some(Duration::hours(2)));
        let requested_before = h.cache.entry().last_request_at;

        assert!(h.cache.reconcile().await);

        let entry = h.cache.entry();
        assert_eq!(entry.report.unwrap().roi, Some(8.0));
        assert_eq!(entry.fetched_at, Some(server_time));
        assert_eq!(entry.last_request_at, requested_before);
        // Reconciliation persists without debounce
        assert_eq!(h.persistence.pending_writes(), 0);
        let persisted = h.persistence.read::<TrainingCacheEntry>().unwrap();
        assert_eq!(persisted.fetched_at, Some(server_time));
    }

    #[tokio::test]
    async fn test_reconcile_discards_equal_or_older_snapshot() {
        let held_at = Utc::now() - Duration::hours(1);
        for candidate in [held_at, held_at - Duration::minutes(5)] {
            let h = harness(
                FakeTraining::new().with_snapshot(Ok(cached(detailed_report(8.0), Some(candidate)))),
            );
            h.cache.state().entry = TrainingCacheEntry {
                report: Some(detailed_report(1.0)),
                fetched_at: Some(held_at),
                last_request_at: None,
            };

            assert!(!h.cache.reconcile().await);
            assert_eq!(h.cache.report().unwrap().roi, Some(1.0));
            assert_eq!(h.cache.entry().fetched_at, Some(held_at));
        }
    }

    #[tokio::test]
    async fn test_reconcile_noop_without_report_or_when_offline() {
        let h = harness(FakeTraining::new());
        assert!(!h.cache.reconcile().await);
        assert_eq!(h.backend.snapshot_calls(), 0);

        seed(&h.cache, detailed_report(1.0), Duration::hours(1), None);
        h.connectivity.set_backend_available(false);
        assert!(!h.cache.reconcile().await);
        assert_eq!(h.backend.snapshot_calls(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_failure_is_silent() {
        let h = harness(
            FakeTraining::new().with_snapshot(Err(ApiError::ServerError("502".into()))),
        );
        seed(&h.cache, detailed_report(1.0), Duration::hours(1), None);
        h.cache.state().error = Some("earlier banner".to_string());

        assert!(!h.cache.reconcile().await);
        assert_eq!(h.cache.error().as_deref(), Some("earlier banner"));
        assert_eq!(h.cache.report().unwrap().roi, Some(1.0));
    }

    #[tokio::test]
    async fn test_report_survives_reload_and_keeps_fast_path() {
        let h = harness(FakeTraining::new());
        h.cache.fetch_training_data(true, 30, None).await;
        h.persistence.flush();

        let backend = Arc::new(FakeTraining::new());
        let reloaded = TrainingCache::new(
            backend.clone(),
            Arc::new(ConnectivityTracker::new()),
            h.persistence.clone(),
            Arc::new(RecordingNotifier::default()),
            vec![],
        );
        let entry = reloaded.entry();
        assert!(Utc::now() - entry.fetched_at.unwrap() < Duration::minutes(1));

        assert_eq!(reloaded.fetch_training_data(false, 30, None).await, FetchOutcome::Fresh);
        assert_eq!(backend.snapshot_calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_cache_removes_memory_and_disk() {
        let h = harness(FakeTraining::new());
        h.cache.update_stats(detailed_report(1.0));
        h.persistence.flush();

        h.cache.clear_cache();

        assert!(h.cache.report().is_none());
        assert!(h.persistence.read::<TrainingCacheEntry>().is_none());
    }
}
