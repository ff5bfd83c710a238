use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single betting-pick suggestion for a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Pick {
    /// Market the pick belongs to, e.g. "1X2" or "over_under_2.5".
    pub market: String,
    pub selection: String,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Pick {
    /// Short display form: "1X2: Home (62%)".
    pub fn label(&self) -> String {
        match self.probability {
            Some(p) => format!("{}: {} ({:.0}%)", self.market, self.selection, p * 100.0),
            None => format!("{}: {}", self.market, self.selection),
        }
    }
}

/// Response of the per-match suggested-picks endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestedPicksResponse {
    #[serde(default)]
    pub suggested_picks: Vec<Pick>,
}

/// One entry of the bulk predictions listing. Picks are embedded when the
/// backend already computed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct MatchPrediction {
    pub match_id: String,
    #[serde(default)]
    pub home_team: Option<String>,
    #[serde(default)]
    pub away_team: Option<String>,
    #[serde(default, with = "crate::persistence::revive::opt")]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub kickoff: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suggested_picks: Vec<Pick>,
}
