//! Durable set of calls the current user is in.
//!
//! Ids are written on invite/join and removed on decline, end, leave or the
//! logout sweep. Persisting them lets logout end calls server-side even when
//! the process restarted mid-call.

use std::sync::{Arc, Mutex};

use crate::storage::{load_json, save_json, KeyValueStore, StorageError};

/// Storage key holding the JSON array of call ids.
pub const ACTIVE_CALLS_KEY: &str = "activeCallIds";

pub struct ActiveCallStore {
    store: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles between the bridge and logout.
    write_lock: Mutex<()>,
}

impl ActiveCallStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// All persisted ids; empty when nothing (or nothing readable) is stored.
    pub fn ids(&self) -> Vec<String> {
        load_json::<Vec<String>>(self.store.as_ref(), ACTIVE_CALLS_KEY).unwrap_or_default()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.ids().iter().any(|id| id == call_id)
    }

    /// Replace the set. Duplicates are collapsed.
    pub fn set_ids(&self, ids: &[String]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.write(dedup(ids.iter().cloned()))
    }

    /// Returns `true` if the id was not present yet.
    pub fn add(&self, call_id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock();
        let mut ids = self.ids();
        if ids.iter().any(|id| id == call_id) {
            return Ok(false);
        }
        ids.push(call_id.to_string());
        self.write(ids)?;
        Ok(true)
    }

    /// Returns `true` if the id was present.
    pub fn remove(&self, call_id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock();
        let mut ids = self.ids();
        let before = ids.len();
        ids.retain(|id| id != call_id);
        if ids.len() == before {
            return Ok(false);
        }
        self.write(ids)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.store.remove(ACTIVE_CALLS_KEY)
    }

    fn write(&self, ids: Vec<String>) -> Result<(), StorageError> {
        save_json(self.store.as_ref(), ACTIVE_CALLS_KEY, &ids)
    }
}

fn dedup(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
