//! REST API client module for the prediction backend.
//!
//! The caches talk to the network only through the `TrainingBackend` and
//! `PicksBackend` traits; `ApiClient` is the reqwest implementation of both.
//! Every error comes back as an `ApiError`, which separates transport
//! failures (backend unreachable) from application-level answers.

pub mod client;
pub mod error;

use async_trait::async_trait;

use crate::models::{CachedSnapshot, Pick, TrainRequest, TrainingReport};

pub use client::ApiClient;
pub use error::ApiError;

/// Endpoints used by the training report cache.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Cheap read of the server's cached result of the last training run.
    async fn fetch_cached_snapshot(&self) -> Result<CachedSnapshot, ApiError>;

    /// Expensive recompute. Long-running.
    async fn train(&self, request: &TrainRequest) -> Result<TrainingReport, ApiError>;
}

/// Endpoint used by the suggestion cache.
#[async_trait]
pub trait PicksBackend: Send + Sync {
    /// Suggested picks for one match. `ApiError::NotFound` means the backend
    /// lacks data for the match.
    async fn fetch_suggested_picks(&self, match_id: &str) -> Result<Vec<Pick>, ApiError>;
}
