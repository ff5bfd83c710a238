//! Background maintenance tasks.
//!
//! - `Reconciler`: periodically asks the training cache to adopt a newer
//!   server snapshot
//! - `StaleSweeper`: periodically evicts suggestion entries past their TTL
//!
//! Both run on the tokio runtime and are stopped through a `SyncHandle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::suggestions::DEFAULT_STALE_TTL_SECS;
use crate::cache::{SuggestionCache, TrainingCache};

/// Shortest allowed tick period; tokio intervals panic on zero.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Handle to a spawned background task.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}

/// Run `tick` every `period` (at least `MIN_PERIOD`) until the handle is
/// stopped. Missed ticks are skipped rather than bunched up.
fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, immediate: bool, mut tick: F) -> SyncHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    let (shutdown, mut stopped) = watch::channel(false);
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(task = name, period_secs = period.as_secs(), "Background task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                _ = stopped.changed() => break,
            }
        }
        debug!(task = name, "Background task stopped");
    });

    SyncHandle { shutdown, task }
}

/// Keeps the held training report in step with the server.
pub struct Reconciler {
    training: Arc<TrainingCache>,
    period: Duration,
    enabled: AtomicBool,
}

impl Reconciler {
    pub fn new(training: Arc<TrainingCache>, period: Duration) -> Self {
        Self {
            training,
            period,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// One reconciliation pass. Skipped while disabled or while a
    /// foreground fetch is running.
    pub async fn tick(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.training.is_loading() {
            debug!("Fetch in progress, skipping reconciliation");
            return false;
        }
        self.training.reconcile().await
    }

    /// Start ticking every period; the first pass happens one period in.
    pub fn spawn(self: Arc<Self>) -> SyncHandle {
        let period = self.period;
        spawn_periodic("reconciler", period, false, move || {
            let this = Arc::clone(&self);
            async move {
                this.tick().await;
            }
        })
    }
}

/// Evicts suggestion entries older than the TTL.
pub struct StaleSweeper {
    suggestions: Arc<SuggestionCache>,
    period: Duration,
    ttl: chrono::Duration,
}

impl StaleSweeper {
    pub fn new(suggestions: Arc<SuggestionCache>, period: Duration) -> Self {
        Self {
            suggestions,
            period,
            ttl: chrono::Duration::seconds(DEFAULT_STALE_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn sweep(&self) -> usize {
        let removed = self.suggestions.clean_stale_cache(self.ttl);
        if removed > 0 {
            info!(removed, "Swept stale suggestion entries");
        }
        removed
    }

    /// Sweep now, then every period.
    pub fn spawn(self) -> SyncHandle {
        let this = Arc::new(self);
        let period = this.period;
        spawn_periodic("stale-sweeper", period, true, move || {
            let this = Arc::clone(&this);
            async move {
                this.sweep();
            }
        })
    }
}
