//! Backtest/training report and the wire shapes around it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of the backend's train/backtest computation.
///
/// Treated as an immutable value: only the fields the caches and the
/// notification summary need are typed, everything else rides along in
/// `extra` so a round trip through the cache preserves the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TrainingReport {
    #[serde(default, with = "crate::persistence::revive::opt")]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub roi: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub total_matches: Option<u64>,
    /// Per-match backtest records. Empty on thin/summary reports.
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "Array<unknown>"))]
    pub match_history: Vec<Value>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl TrainingReport {
    /// True when the report carries per-match history. Summary-only reports
    /// from older backends are not enough to skip a server check.
    pub fn is_detailed(&self) -> bool {
        !self.match_history.is_empty()
    }

    /// Number of matches the report covers, preferring the explicit count.
    pub fn matches_covered(&self) -> u64 {
        self.total_matches
            .unwrap_or(self.match_history.len() as u64)
    }

    /// One-line summary used for notifications and status output.
    pub fn summary(&self) -> String {
        let roi = self
            .roi
            .map(|r| format!("{:+.1}%", r))
            .unwrap_or_else(|| "n/a".to_string());
        let accuracy = self
            .accuracy
            .map(|a| format!("{:.1}%", a))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "ROI {} · accuracy {} over {} matches",
            roi,
            accuracy,
            self.matches_covered()
        )
    }
}

/// Response of the cheap "current server-side cached result" endpoint.
/// `cached = false` is the normal answer before the first training run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachedSnapshot {
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub data: Option<TrainingReport>,
    #[serde(default, with = "crate::persistence::revive::opt")]
    pub last_update: Option<DateTime<Utc>>,
}

impl CachedSnapshot {
    /// The report, if the server actually holds one.
    pub fn into_report(self) -> Option<(TrainingReport, Option<DateTime<Utc>>)> {
        match (self.cached, self.data) {
            (true, Some(report)) => Some((report, self.last_update)),
            _ => None,
        }
    }
}

/// Body of the expensive train call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRequest {
    pub league_ids: Vec<String>,
    pub days_back: u32,
    pub start_date: Option<NaiveDate>,
    pub reset_weights: bool,
}
