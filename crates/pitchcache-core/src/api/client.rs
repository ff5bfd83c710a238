//! API client for the prediction backend.
//!
//! This module provides the `ApiClient` struct for the three cache-facing
//! endpoints (cached snapshot, train, suggested picks) plus the bulk
//! predictions listing.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{
    CachedSnapshot, MatchPrediction, Pick, SuggestedPicksResponse, TrainRequest, TrainingReport,
};

use super::{ApiError, PicksBackend, TrainingBackend};

// ============================================================================
// Constants
// ============================================================================

/// Server-side cached result of the last training run (cheap).
const CACHED_SNAPSHOT_PATH: &str = "/api/v1/train/cached";

/// Full train/backtest recompute (expensive, rate-limited).
const TRAIN_PATH: &str = "/api/v1/train";

/// Per-match pick suggestions, `/{match_id}` appended.
const SUGGESTED_PICKS_PATH: &str = "/api/v1/suggested-picks";

/// Bulk predictions listing with embedded picks.
const PREDICTIONS_PATH: &str = "/api/v1/predictions";

/// HTTP request timeout in seconds for the live/prediction endpoints.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the train call. A full backtest takes minutes.
const TRAIN_TIMEOUT_SECS: u64 = 600;

/// Maximum number of retries for rate-limited (429) GET requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the prediction backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    train_client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client with default timeouts
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeouts(
            base_url,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            Duration::from_secs(TRAIN_TIMEOUT_SECS),
        )
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_timeouts(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.train_timeout_secs),
        )
    }

    pub fn with_timeouts(base_url: &str, request: Duration, train: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request)
            .build()
            .context("Failed to build HTTP client")?;
        let train_client = Client::builder()
            .timeout(train)
            .build()
            .context("Failed to build HTTP client for training")?;

        Ok(Self {
            client,
            train_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log a failed request. 404s on paths where "not found" means
    /// "insufficient data" are expected and stay at debug level.
    fn log_failure(url: &str, err: &ApiError, quiet_not_found: bool) {
        if quiet_not_found && err.is_not_found() {
            debug!(url = url, "No data for request (404)");
        } else if err.is_transport() {
            warn!(url = url, error = %err, "Backend unreachable");
        } else {
            warn!(url = url, error = %err, "Request failed");
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, ApiError> {
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    /// Send a request and apply the shared error logging.
    async fn send(
        url: &str,
        request: RequestBuilder,
        quiet_not_found: bool,
    ) -> Result<Response, ApiError> {
        let result = match request.send().await {
            Ok(response) => Self::check_response(response).await,
            Err(e) => Err(ApiError::from(e)),
        };
        if let Err(ref e) = result {
            if !matches!(e, ApiError::RateLimited) {
                Self::log_failure(url, e, quiet_not_found);
            }
        }
        result
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, quiet_not_found: bool) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match Self::send(url, self.client.get(url), quiet_not_found).await {
                Ok(response) => return Self::parse(url, response).await,
                Err(ApiError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        warn!(url = url, "Rate limited, giving up");
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ===== Data Fetching Methods =====

    /// Fetch the bulk predictions listing for a league
    pub async fn fetch_predictions(&self, league_id: &str) -> Result<Vec<MatchPrediction>, ApiError> {
        let url = format!("{}?league_id={}", self.url(PREDICTIONS_PATH), league_id);
        self.get(&url, false).await
    }
}

#[async_trait]
impl TrainingBackend for ApiClient {
    async fn fetch_cached_snapshot(&self) -> Result<CachedSnapshot, ApiError> {
        let url = self.url(CACHED_SNAPSHOT_PATH);
        self.get(&url, false).await
    }

    async fn train(&self, request: &TrainRequest) -> Result<TrainingReport, ApiError> {
        let url = self.url(TRAIN_PATH);
        debug!(
            leagues = request.league_ids.len(),
            days_back = request.days_back,
            "Requesting training run"
        );
        // No retry here: a 429 means the backend is protecting itself
        let response = Self::send(&url, self.train_client.post(&url).json(request), false)
            .await
            .inspect_err(|e| {
                if matches!(e, ApiError::RateLimited) {
                    warn!(url = %url, "Training endpoint rate limited");
                }
            })?;
        Self::parse(&url, response).await
    }
}

#[async_trait]
impl PicksBackend for ApiClient {
    async fn fetch_suggested_picks(&self, match_id: &str) -> Result<Vec<Pick>, ApiError> {
        let url = format!("{}/{}", self.url(SUGGESTED_PICKS_PATH), match_id);
        let response: SuggestedPicksResponse = self.get(&url, true).await?;
        Ok(response.suggested_picks)
    }
}
