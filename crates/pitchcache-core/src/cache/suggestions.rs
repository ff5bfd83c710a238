//! Per-match pick suggestions.
//!
//! Reads never touch the network and never check freshness; freshness is
//! enforced when prefetching. At most one fetch per match id is in flight at
//! a time. The mapping is capped at `MAX_ENTRIES`, evicting the entries with
//! the oldest `cached_at` (least recently written, not least recently read).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::PicksBackend;
use crate::connectivity::ConnectivityTracker;
use crate::models::{MatchPrediction, Pick};
use crate::persistence::{revive, PersistedRecord, Persistence};

/// Maximum number of matches kept in the cache.
pub const MAX_ENTRIES: usize = 100;

/// A cached pick list younger than this is not re-fetched.
pub const PICKS_TTL_MINUTES: i64 = 30;

/// Default age after which `clean_stale_cache` drops an entry (24h).
pub const DEFAULT_STALE_TTL_SECS: i64 = 86_400;

/// Limit on parallel fetches in `prefetch_many`.
const MAX_CONCURRENT_PREFETCHES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionEntry {
    pub match_id: String,
    pub picks: Vec<Pick>,
    pub cached_at: DateTime<Utc>,
}

impl SuggestionEntry {
    fn new(match_id: &str, picks: Vec<Pick>) -> Self {
        Self {
            match_id: match_id.to_string(),
            picks,
            cached_at: Utc::now(),
        }
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.cached_at
    }
}

// ===== Persisted form =====

/// The pick mapping as persisted. In-flight state is never persisted.
struct SuggestionRecord {
    entries: Vec<SuggestionEntry>,
}

#[derive(Serialize, Deserialize)]
struct SuggestionEntryWire {
    match_id: String,
    picks: Vec<Pick>,
    cached_at: String,
}

#[derive(Serialize, Deserialize)]
struct SuggestionRecordWire {
    #[serde(default)]
    entries: Vec<SuggestionEntryWire>,
}

impl PersistedRecord for SuggestionRecord {
    const KEY: &'static str = "suggestion_cache";
    type Wire = SuggestionRecordWire;

    fn encode(&self) -> SuggestionRecordWire {
        SuggestionRecordWire {
            entries: self
                .entries
                .iter()
                .map(|e| SuggestionEntryWire {
                    match_id: e.match_id.clone(),
                    picks: e.picks.clone(),
                    cached_at: revive::encode_timestamp(&e.cached_at),
                })
                .collect(),
        }
    }

    fn decode(wire: SuggestionRecordWire) -> Self {
        // An entry whose timestamp can't be revived can't be aged; drop it
        let entries = wire
            .entries
            .into_iter()
            .filter_map(|e| {
                let cached_at = revive::revive_timestamp(&e.cached_at)?;
                Some(SuggestionEntry {
                    match_id: e.match_id,
                    picks: e.picks,
                    cached_at,
                })
            })
            .collect();
        Self { entries }
    }
}

// ===== Cache =====

#[derive(Default)]
struct PicksState {
    entries: HashMap<String, SuggestionEntry>,
    in_flight: HashSet<String>,
}

impl PicksState {
    /// Drop the oldest entries until the mapping is back under the bound.
    fn trim_to_bound(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(MAX_ENTRIES);
        match excess {
            0 => 0,
            1 => {
                let oldest = self
                    .entries
                    .values()
                    .min_by_key(|e| e.cached_at)
                    .map(|e| e.match_id.clone());
                if let Some(id) = oldest {
                    self.entries.remove(&id);
                }
                1
            }
            n => {
                let mut by_age: Vec<(DateTime<Utc>, String)> = self
                    .entries
                    .values()
                    .map(|e| (e.cached_at, e.match_id.clone()))
                    .collect();
                by_age.sort();
                for (_, id) in by_age.into_iter().take(n) {
                    self.entries.remove(&id);
                }
                n
            }
        }
    }

    fn record(&self) -> SuggestionRecord {
        SuggestionRecord {
            entries: self.entries.values().cloned().collect(),
        }
    }
}

/// Clears the in-flight marker for a match when the fetch settles, including
/// when the fetching future is dropped.
struct InFlightGuard<'a> {
    cache: &'a SuggestionCache,
    match_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.state().in_flight.remove(&self.match_id);
    }
}

pub struct SuggestionCache {
    backend: Arc<dyn PicksBackend>,
    connectivity: Arc<ConnectivityTracker>,
    persistence: Persistence,
    state: Mutex<PicksState>,
}

impl SuggestionCache {
    /// Create the cache, hydrating any persisted picks.
    pub fn new(
        backend: Arc<dyn PicksBackend>,
        connectivity: Arc<ConnectivityTracker>,
        persistence: Persistence,
    ) -> Self {
        let mut state = PicksState::default();
        if let Some(record) = persistence.read::<SuggestionRecord>() {
            for entry in record.entries {
                state.entries.insert(entry.match_id.clone(), entry);
            }
            let trimmed = state.trim_to_bound();
            debug!(
                entries = state.entries.len(),
                trimmed, "Hydrated suggestion cache"
            );
        }

        Self {
            backend,
            connectivity,
            persistence,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, PicksState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, record: SuggestionRecord) {
        self.persistence.write_debounced(&record);
    }

    /// Cached picks for a match, however old. No network.
    pub fn get_picks(&self, match_id: &str) -> Option<Vec<Pick>> {
        self.state().entries.get(match_id).map(|e| e.picks.clone())
    }

    /// When the picks for a match were last written.
    pub fn cached_at(&self, match_id: &str) -> Option<DateTime<Utc>> {
        self.state().entries.get(match_id).map(|e| e.cached_at)
    }

    pub fn is_fetching(&self, match_id: &str) -> bool {
        self.state().in_flight.contains(match_id)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Fetch picks for a match unless a fresh copy is cached or a fetch for
    /// it is already running. Failures are swallowed: missing picks just
    /// mean "no suggestions".
    pub async fn prefetch_match(&self, match_id: &str) {
        let _guard = {
            let mut state = self.state();
            if state.in_flight.contains(match_id) {
                debug!(match_id = %match_id, "Picks fetch already in flight");
                return;
            }
            if let Some(entry) = state.entries.get(match_id) {
                if entry.age(Utc::now()) < Duration::minutes(PICKS_TTL_MINUTES) {
                    return;
                }
            }
            state.in_flight.insert(match_id.to_string());
            InFlightGuard {
                cache: self,
                match_id: match_id.to_string(),
            }
        };

        match self.backend.fetch_suggested_picks(match_id).await {
            Ok(picks) => {
                self.connectivity.record_success();
                debug!(match_id = %match_id, count = picks.len(), "Fetched picks");
                self.cache_picks(match_id, picks);
            }
            Err(e) => {
                self.connectivity.record_failure(&e);
                if e.is_not_found() {
                    debug!(match_id = %match_id, "No picks available for match");
                } else {
                    debug!(match_id = %match_id, error = %e, "Picks fetch failed");
                }
            }
        }
    }

    /// Prefetch a list of matches (e.g. everything currently visible) with
    /// bounded concurrency.
    pub async fn prefetch_many(&self, match_ids: &[String]) {
        stream::iter(match_ids)
            .for_each_concurrent(MAX_CONCURRENT_PREFETCHES, |id| self.prefetch_match(id))
            .await;
    }

    /// Upsert picks for a match, stamped now. Evicts the single oldest entry
    /// if the bound is exceeded.
    pub fn cache_picks(&self, match_id: &str, picks: Vec<Pick>) {
        let record = {
            let mut state = self.state();
            state
                .entries
                .insert(match_id.to_string(), SuggestionEntry::new(match_id, picks));
            if state.trim_to_bound() > 0 {
                debug!("Suggestion cache full, evicted oldest entry");
            }
            state.record()
        };
        self.persist(record);
    }

    /// Absorb picks embedded in a bulk predictions response. Items without
    /// picks are skipped. Returns the number of matches cached.
    pub fn ingest_predictions(&self, predictions: &[MatchPrediction]) -> usize {
        let (ingested, record) = {
            let mut state = self.state();
            let mut ingested = 0;
            for prediction in predictions {
                if prediction.suggested_picks.is_empty() {
                    continue;
                }
                state.entries.insert(
                    prediction.match_id.clone(),
                    SuggestionEntry::new(&prediction.match_id, prediction.suggested_picks.clone()),
                );
                ingested += 1;
            }
            // One pass for the whole batch
            let evicted = state.trim_to_bound();
            if evicted > 0 {
                debug!(evicted, "Trimmed suggestion cache after batch");
            }
            (ingested, state.record())
        };

        if ingested > 0 {
            self.persist(record);
        }
        ingested
    }

    /// Remove entries older than `ttl`. Returns how many were removed.
    pub fn clean_stale_cache(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let (removed, record) = {
            let mut state = self.state();
            let before = state.entries.len();
            state.entries.retain(|_, e| e.age(now) <= ttl);
            (before - state.entries.len(), state.record())
        };

        if removed > 0 {
            info!(removed, "Removed stale pick suggestions");
            self.persist(record);
        }
        removed
    }

    /// Remove every cached entry and the persisted copy.
    pub fn clear(&self) {
        self.state().entries.clear();
        self.persistence.remove::<SuggestionRecord>();
    }
}
