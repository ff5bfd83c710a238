//! Application configuration management.
//!
//! This module handles loading the application configuration:
//! backend URL, the league set used for training runs, timeouts, and the
//! background sync intervals.
//!
//! Configuration is stored at `~/.config/pitchcache/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "pitchcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment override for the backend URL
const ENV_API_URL: &str = "PITCHCACHE_API_URL";

/// Environment override for the training look-back window
const ENV_DAYS_BACK: &str = "PITCHCACHE_DAYS_BACK";

/// Background intervals below this are raised to it
const MIN_INTERVAL_SECS: u64 = 1;

/// Leagues every training run covers: Premier League, La Liga, Serie A,
/// Bundesliga, Ligue 1.
pub const DEFAULT_LEAGUE_IDS: [&str; 5] = ["39", "140", "135", "78", "61"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub league_ids: Vec<String>,
    pub days_back: u32,
    pub request_timeout_secs: u64,
    pub train_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub stale_sweep_interval_secs: u64,
    pub persist_debounce_ms: u64,
    pub notifications: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            league_ids: DEFAULT_LEAGUE_IDS.iter().map(|s| s.to_string()).collect(),
            days_back: 30,
            request_timeout_secs: 30,
            train_timeout_secs: 600,
            reconcile_interval_secs: 300,
            stale_sweep_interval_secs: 3600,
            persist_debounce_ms: 1000,
            notifications: true,
        }
    }
}

impl Config {
    /// Load from disk (defaults if absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(raw) = lookup(ENV_DAYS_BACK) {
            match raw.parse() {
                Ok(days) => self.days_back = days,
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", ENV_DAYS_BACK),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where caches and watch-mode logs live. Independent of the loaded
    /// config, so it is usable before `load`.
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(MIN_INTERVAL_SECS))
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs.max(MIN_INTERVAL_SECS))
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}
