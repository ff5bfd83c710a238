//! Pitchcache core - offline-first sync and caching for the prediction
//! dashboard.
//!
//! The pieces fit together like this:
//!
//! - `api`: HTTP client for the prediction backend and the backend traits
//!   the caches are written against
//! - `persistence`: debounced key/value persistence with timestamp revival
//! - `connectivity`: shared "is the backend reachable" flag
//! - `cache`: the suggestion cache and the training report cache
//! - `sync`: background reconciliation and stale-entry sweeping
//!
//! Front ends construct one of each service, share them via `Arc`, and read
//! cached state synchronously while fetches run in the background.

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod sync;

pub use api::{ApiClient, ApiError};
pub use cache::{FetchOutcome, SuggestionCache, TrainingCache};
pub use config::Config;
pub use connectivity::ConnectivityTracker;
pub use notify::{Notifier, TracingNotifier};
pub use persistence::{FileStorage, Persistence};
pub use sync::{Reconciler, StaleSweeper, SyncHandle};
