//! Data models for the prediction backend.
//!
//! - `TrainingReport`, `CachedSnapshot`, `TrainRequest`: backtest/training
//! - `Pick`, `MatchPrediction`, `SuggestedPicksResponse`: per-match suggestions

pub mod picks;
pub mod report;

pub use picks::{MatchPrediction, Pick, SuggestedPicksResponse};
pub use report::{CachedSnapshot, TrainRequest, TrainingReport};
