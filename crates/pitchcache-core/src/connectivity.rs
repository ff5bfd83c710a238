//! Process-wide "is the backend reachable" flag.
//!
//! Any component that talks to the backend reports outcomes here. Only
//! transport failures flip the flag to offline; any response from the server,
//! including an HTTP error status, flips it back. Starts optimistic so the
//! app keeps trying to recover instead of latching offline.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;

use crate::api::ApiError;

pub struct ConnectivityTracker {
    available: watch::Sender<bool>,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        let (available, _) = watch::channel(true);
        Self {
            available,
            last_sync_at: Mutex::new(None),
        }
    }

    pub fn is_backend_available(&self) -> bool {
        *self.available.borrow()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_backend_available(&self, available: bool) {
        let changed = self.available.send_if_modified(|current| {
            if *current == available {
                false
            } else {
                *current = available;
                true
            }
        });
        if changed {
            if available {
                info!("Backend reachable again");
            } else {
                info!("Backend unreachable, working from local state");
            }
        }
    }

    /// Stamp the time of the last successful round trip.
    pub fn update_last_sync(&self) {
        *self.last_sync_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    /// A request completed at the transport level.
    pub fn record_success(&self) {
        self.set_backend_available(true);
        self.update_last_sync();
    }

    /// A request failed. An application-level error still proves the
    /// backend answered, so only transport errors mark it unavailable.
    pub fn record_failure(&self, err: &ApiError) {
        if err.is_transport() {
            self.set_backend_available(false);
        } else {
            self.record_success();
        }
    }

    /// Watch availability changes, e.g. to drive an offline banner.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }
}
