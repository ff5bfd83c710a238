//! Persistence adapter shared by both caches.
//!
//! Records are typed through `PersistedRecord`: each persisted shape names
//! its storage key and a wire form whose timestamps are plain strings, plus
//! the `encode`/`decode` pair between the two. Decoding revives timestamps
//! through `revive`, the one place that turns strings back into instants.
//!
//! Persistence is a durability optimization only. In-memory cache state is
//! authoritative for the running process, so writes never return errors to
//! callers; failures are logged and dropped.

pub mod revive;
pub mod storage;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

pub use storage::{FileStorage, MemoryStorage, Storage, StorageError, StorageResult};

/// Default window for coalescing debounced writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// A shape that can be written through `Persistence`.
pub trait PersistedRecord: Sized + 'static {
    /// Storage key for this record.
    const KEY: &'static str;

    /// On-disk form. Timestamps are strings here.
    type Wire: Serialize + DeserializeOwned;

    fn encode(&self) -> Self::Wire;

    fn decode(wire: Self::Wire) -> Self;
}

struct PendingWrite {
    generation: u64,
    payload: String,
}

/// Typed, failure-tolerant front end over a `Storage`.
/// Clone is cheap - all clones share the storage and the pending-write table.
#[derive(Clone)]
pub struct Persistence {
    storage: Arc<dyn Storage>,
    debounce: Duration,
    pending: Arc<Mutex<HashMap<&'static str, PendingWrite>>>,
    next_generation: Arc<AtomicU64>,
}

impl Persistence {
    pub fn new(storage: Arc<dyn Storage>, debounce: Duration) -> Self {
        Self {
            storage,
            debounce,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// In-memory persistence, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), DEFAULT_DEBOUNCE)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, PendingWrite>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read and revive a record. Missing or corrupt records read as `None`.
    pub fn read<R: PersistedRecord>(&self) -> Option<R> {
        let raw = match self.storage.get(R::KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = R::KEY, error = %e, "Failed to read persisted record");
                return None;
            }
        };

        match serde_json::from_str::<R::Wire>(&raw) {
            Ok(wire) => Some(R::decode(wire)),
            Err(e) => {
                let err = StorageError::Corrupt {
                    key: R::KEY.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Ignoring unreadable persisted record");
                None
            }
        }
    }

    /// Write a record now, superseding any pending debounced write for its key.
    ///
    /// Storage access happens under the pending-write lock, so a debounced
    /// write that is already storing finishes before this one lands.
    pub fn write<R: PersistedRecord>(&self, record: &R) {
        let Some(payload) = Self::serialize(record) else {
            return;
        };
        let mut pending = self.pending();
        pending.remove(R::KEY);
        self.store(R::KEY, payload);
    }

    /// Write a record after the debounce window, unless a later write for the
    /// same key arrives first.
    pub fn write_debounced<R: PersistedRecord>(&self, record: &R) {
        let Some(payload) = Self::serialize(record) else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime to schedule the delayed write on
            let mut pending = self.pending();
            pending.remove(R::KEY);
            self.store(R::KEY, payload);
            return;
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.pending().insert(R::KEY, PendingWrite { generation, payload });

        let this = self.clone();
        handle.spawn(async move {
            let key = R::KEY;
            tokio::time::sleep(this.debounce).await;
            let mut pending = this.pending();
            let current = pending
                .get(key)
                .is_some_and(|p| p.generation == generation);
            if current {
                if let Some(write) = pending.remove(key) {
                    this.store(key, write.payload);
                }
            }
        });
    }

    /// Delete a record and drop any pending write for it.
    pub fn remove<R: PersistedRecord>(&self) {
        let mut pending = self.pending();
        pending.remove(R::KEY);
        if let Err(e) = self.storage.delete(R::KEY) {
            warn!(key = R::KEY, error = %e, "Failed to delete persisted record");
        }
    }

    /// Write every pending debounced record immediately.
    pub fn flush(&self) {
        let mut pending = self.pending();
        for (key, write) in pending.drain() {
            self.store(key, write.payload);
        }
    }

    /// Number of debounced writes not yet on storage.
    pub fn pending_writes(&self) -> usize {
        self.pending().len()
    }

    fn serialize<R: PersistedRecord>(record: &R) -> Option<String> {
        match serde_json::to_string(&record.encode()).map_err(StorageError::from) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(key = R::KEY, error = %e, "Dropping write");
                None
            }
        }
    }

    fn store(&self, key: &str, payload: String) {
        match self.storage.set(key, payload) {
            Ok(()) => debug!(key, "Persisted record"),
            Err(e) => warn!(key, error = %e, "Failed to persist record"),
        }
    }
}
