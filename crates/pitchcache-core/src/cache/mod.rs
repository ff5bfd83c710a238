//! Client-side caches in front of the prediction backend.
//!
//! - `SuggestionCache`: bounded, TTL-aware pick suggestions per match, with
//!   in-flight request de-duplication
//! - `TrainingCache`: the single backtest/training report, with a freshness
//!   policy, anti-spam throttling of the recompute call, and background
//!   reconciliation against the server's cached snapshot
//!
//! Both write through `Persistence` so state survives a restart, and both
//! report network outcomes to the `ConnectivityTracker`.

pub mod suggestions;
pub mod training;

use chrono::{DateTime, Utc};

pub use suggestions::{SuggestionCache, SuggestionEntry};
pub use training::{FetchOutcome, TrainingCache, TrainingCacheEntry};

/// Whole minutes since `at`. Negative under clock skew.
pub fn age_minutes(at: DateTime<Utc>) -> i64 {
    (Utc::now() - at).num_minutes()
}

/// Human-readable age, e.g. "just now", "5m ago", "2h ago", "3d ago".
pub fn format_age(at: DateTime<Utc>) -> String {
    let minutes = age_minutes(at);
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins >= 30 {
            // Round up: 1h 30m+ becomes 2h
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        let remaining_hours = (minutes % 1440) / 60;
        if remaining_hours >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}
