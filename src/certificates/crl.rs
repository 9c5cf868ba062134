//! Cached certificate revocation list.
//!
//! Readers take an `Arc` to the current snapshot; a refresh builds a new
//! snapshot and swaps it in whole. Refreshes are serialized so a slower,
//! older refresh can never overwrite a newer one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::certificate::{Certificate, CertificateStatus, RevocationReason};
use crate::error::CryptoResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlEntry {
    pub certificate_id: String,
    pub owner_id: String,
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrlSnapshot {
    pub entries: Vec<CrlEntry>,
    pub refreshed_at: DateTime<Utc>,
    #[serde(skip)]
    ids: HashSet<String>,
}

impl CrlSnapshot {
    pub(crate) fn build(certificates: &[Certificate], now: DateTime<Utc>) -> Self {
        let mut entries: Vec<CrlEntry> = certificates
            .iter()
            .filter(|c| c.status == CertificateStatus::Revoked)
            .filter_map(|c| {
                c.revocation.as_ref().map(|revocation| CrlEntry {
                    certificate_id: c.id.clone(),
                    owner_id: c.owner_id.clone(),
                    revoked_at: revocation.revoked_at,
                    reason: revocation.reason,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.revoked_at.cmp(&b.revoked_at).then_with(|| a.certificate_id.cmp(&b.certificate_id)));
        let ids = entries.iter().map(|e| e.certificate_id.clone()).collect();

        Self {
            entries,
            refreshed_at: now,
            ids,
        }
    }

    pub fn contains(&self, certificate_id: &str) -> bool {
        self.ids.contains(certificate_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) struct CrlCache {
    current: RwLock<Arc<CrlSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl CrlCache {
    pub(crate) fn new(initial: CrlSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            refresh_lock: Mutex::new(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<CrlSnapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Rebuild from `load` and swap the result in.
    pub(crate) fn refresh<F>(&self, load: F) -> CryptoResult<Arc<CrlSnapshot>>
    where
        F: FnOnce() -> CryptoResult<CrlSnapshot>,
    {
        let _guard = self.refresh_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = Arc::new(load()?);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        Ok(snapshot)
    }
}
