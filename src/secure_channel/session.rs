//! Per-principal session key cache.
//!
//! The map is never mutated in place: writers clone it, apply their change
//! and swap the new map in, so readers holding the previous `Arc` see a
//! complete, consistent snapshot. Entries are never served past
//! `expires_at`, whether or not the sweeper has run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::secure_memory::SecureBytes;

/// What a principal receives from `create_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub owner_id: String,
    /// Base64 RSA-OAEP wrap of the session key to the owner's current key.
    pub encrypted_session_key: String,
    pub iv: String,
    pub key_id: String,
    pub expires_at: DateTime<Utc>,
    /// Served from the cache rather than freshly minted.
    pub reused: bool,
}

#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub(crate) session_id: String,
    pub(crate) key: SecureBytes,
    pub(crate) iv: Vec<u8>,
    pub(crate) expires_at: DateTime<Utc>,
}

type SessionMap = HashMap<String, Arc<SessionEntry>>;

#[derive(Default)]
pub(crate) struct SessionCache {
    entries: RwLock<Arc<SessionMap>>,
}

impl SessionCache {
    fn snapshot(&self) -> Arc<SessionMap> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn swap<F: FnOnce(&mut SessionMap) -> usize>(&self, change: F) -> usize {
        let mut current = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next = SessionMap::clone(&current);
        let changed = change(&mut next);
        *current = Arc::new(next);
        changed
    }

    pub(crate) fn get_valid(&self, owner_id: &str, now: DateTime<Utc>) -> Option<Arc<SessionEntry>> {
        self.snapshot()
            .get(owner_id)
            .filter(|entry| entry.expires_at > now)
            .cloned()
    }

    pub(crate) fn insert(&self, owner_id: &str, entry: SessionEntry) -> Arc<SessionEntry> {
        let entry = Arc::new(entry);
        let stored = entry.clone();
        self.swap(move |map| {
            map.insert(owner_id.to_string(), stored);
            1
        });
        entry
    }

    /// Drop expired entries. Returns how many were removed.
    pub(crate) fn sweep(&self, now: DateTime<Utc>) -> usize {
        if !self.snapshot().values().any(|entry| entry.expires_at <= now) {
            return 0;
        }
        self.swap(|map| {
            let before = map.len();
            map.retain(|_, entry| entry.expires_at > now);
            before - map.len()
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}
