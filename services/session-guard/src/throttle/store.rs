// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Throttle state store.
//!
//! In-memory map from action identifier to record, mirrored to a single JSON
//! blob in [`Storage`] for records whose class asks for persistence. The blob
//! is read once when the store is loaded; later writes always rewrite it from
//! the in-memory map.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::record::ThrottleRecord;
use crate::error::Result;
use crate::storage::Storage;

/// Entries whose window began this long ago are dropped on load.
pub const STALE_AFTER_MS: i64 = 300_000;

/// Record plus bookkeeping that never reaches storage.
#[derive(Debug)]
pub(crate) struct Entry {
    pub record: ThrottleRecord,
    /// Class of the last config applied to this record asked for persistence
    pub persist: bool,
    /// When the current block lifts; `None` for restored blocks until a
    /// config is known
    pub unblock_at: Option<i64>,
    /// Generation of the current block, matched by the timer on fire
    pub generation: u64,
    /// Pending deferred unblock task
    pub timer: Option<AbortHandle>,
}

impl Entry {
    pub fn new(record: ThrottleRecord, persist: bool) -> Self {
        Self {
            record,
            persist,
            unblock_at: None,
            generation: 0,
            timer: None,
        }
    }

    /// Abort any scheduled unblock.
    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

/// Throttle records keyed by action identifier.
pub struct ThrottleStore {
    entries: HashMap<String, Entry>,
    storage: Arc<dyn Storage>,
    key: String,
}

impl ThrottleStore {
    /// Load persisted state, dropping stale entries.
    ///
    /// Unreadable storage yields an empty store. A blob that fails to parse
    /// is deleted so the next write starts clean.
    pub fn load(storage: Arc<dyn Storage>, key: impl Into<String>, now: i64) -> Self {
        let key = key.into();
        let mut store = Self {
            entries: HashMap::new(),
            storage,
            key,
        };

        let raw = match store.storage.get(&store.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return store,
            Err(e) => {
                warn!(key = %store.key, error = %e, "Failed to read persisted throttle state");
                return store;
            }
        };

        let parsed: HashMap<String, ThrottleRecord> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(key = %store.key, error = %e, "Discarding corrupted throttle state");
                if let Err(e) = store.storage.remove(&store.key) {
                    warn!(key = %store.key, error = %e, "Failed to remove corrupted throttle state");
                }
                return store;
            }
        };

        let total = parsed.len();
        for (action_id, record) in parsed {
            if action_id.is_empty() || record.window_age(now) >= STALE_AFTER_MS {
                continue;
            }
            store.entries.insert(action_id, Entry::new(record, true));
        }

        info!(
            key = %store.key,
            restored = store.entries.len(),
            dropped = total - store.entries.len(),
            "Restored persisted throttle state"
        );
        store
    }

    /// Snapshot of one record.
    pub fn record(&self, action_id: &str) -> Option<ThrottleRecord> {
        self.entries.get(action_id).map(|e| e.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifiers currently mirrored to storage, sorted.
    pub fn persisted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.persist)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub(crate) fn contains(&self, action_id: &str) -> bool {
        self.entries.contains_key(action_id)
    }

    pub(crate) fn get(&self, action_id: &str) -> Option<&Entry> {
        self.entries.get(action_id)
    }

    pub(crate) fn get_mut(&mut self, action_id: &str) -> Option<&mut Entry> {
        self.entries.get_mut(action_id)
    }

    pub(crate) fn insert(&mut self, action_id: &str, entry: Entry) -> &mut Entry {
        self.entries.entry(action_id.to_string()).or_insert(entry)
    }

    pub(crate) fn remove(&mut self, action_id: &str) -> Option<Entry> {
        self.entries.remove(action_id)
    }

    /// Drop every entry, cancelling their timers.
    pub(crate) fn clear(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cancel_timer();
        }
        self.entries.clear();
    }

    /// Rewrite the persisted blob from the in-memory map.
    ///
    /// Storage failures are logged, never propagated.
    pub(crate) fn persist(&self) {
        if let Err(e) = self.write_blob() {
            warn!(key = %self.key, error = %e, "Failed to persist throttle state");
        }
    }

    /// Delete the persisted blob regardless of contents.
    pub(crate) fn remove_blob(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            warn!(key = %self.key, error = %e, "Failed to remove throttle state");
        }
    }

    fn write_blob(&self) -> Result<()> {
        let persisted: BTreeMap<&str, &ThrottleRecord> = self
            .entries
            .iter()
            .filter(|(_, e)| e.persist)
            .map(|(id, e)| (id.as_str(), &e.record))
            .collect();

        if persisted.is_empty() {
            self.storage.remove(&self.key)?;
            debug!(key = %self.key, "No persisted throttle records left, removed key");
            return Ok(());
        }

        let blob = serde_json::to_string(&persisted)?;
        self.storage.set(&self.key, &blob)?;
        debug!(key = %self.key, records = persisted.len(), "Persisted throttle state");
        Ok(())
    }
}

impl std::fmt::Debug for ThrottleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleStore")
            .field("key", &self.key)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const KEY: &str = "throttle_state";

    fn record(window_started_at: i64) -> ThrottleRecord {
        ThrottleRecord {
            last_attempt_at: window_started_at,
            attempt_count: 1,
            window_started_at,
            blocked: false,
        }
    }

    #[test]
    fn test_load_empty_storage() {
        let storage = MemoryStorage::new();
        let store = ThrottleStore::load(Arc::new(storage), KEY, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_drops_stale_entries() {
        let storage = MemoryStorage::new();
        let now = 1_000_000;
        let blob = serde_json::json!({
            "fresh-submit": record(now - 10_000),
            "edge-submit": record(now - STALE_AFTER_MS),
            "old-submit": record(now - STALE_AFTER_MS - 1),
        });
        storage.set(KEY, &blob.to_string()).unwrap();

        let store = ThrottleStore::load(Arc::new(storage), KEY, now);
        assert_eq!(store.len(), 1);
        assert!(store.record("fresh-submit").is_some());
        assert_eq!(store.persisted_ids(), vec!["fresh-submit".to_string()]);
    }

    #[test]
    fn test_corrupted_blob_is_removed() {
        let storage = MemoryStorage::new();
        storage.set(KEY, "{not json").unwrap();

        let store = ThrottleStore::load(Arc::new(storage.clone()), KEY, 0);
        assert!(store.is_empty());
        assert_eq!(storage.get(KEY).unwrap(), None);
    }

    #[test]
    fn test_persist_filters_non_persisted_entries() {
        let storage = MemoryStorage::new();
        let mut store = ThrottleStore::load(Arc::new(storage.clone()), KEY, 0);

        store.insert("login-submit", Entry::new(record(0), true));
        store.insert("search-submit", Entry::new(record(0), false));
        store.persist();

        let blob: HashMap<String, ThrottleRecord> =
            serde_json::from_str(&storage.get(KEY).unwrap().unwrap()).unwrap();
        assert!(blob.contains_key("login-submit"));
        assert!(!blob.contains_key("search-submit"));

        store.remove("login-submit");
        store.persist();
        assert_eq!(storage.get(KEY).unwrap(), None);
    }
}
