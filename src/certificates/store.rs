//! Authoritative certificate storage.
//!
//! Certificates are never physically deleted. Writers serialize per record,
//! so two concurrent revocations of one certificate cannot both succeed while
//! reads and writes of other certificates proceed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use super::certificate::Certificate;
use crate::error::{error_codes, CryptoError, CryptoResult};

pub trait CertificateStore: Send + Sync {
    /// Insert a new certificate. A fingerprint seen before is a `Conflict`.
    fn insert(&self, certificate: Certificate) -> CryptoResult<()>;

    fn get(&self, id: &str) -> CryptoResult<Option<Certificate>>;

    /// Apply `f` to one record under that record's lock and return the
    /// result. When `f` fails the record is left untouched.
    fn update(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut Certificate) -> CryptoResult<()>,
    ) -> CryptoResult<Certificate>;

    fn list_for_owner(&self, owner_id: &str) -> CryptoResult<Vec<Certificate>>;

    fn list_all(&self) -> CryptoResult<Vec<Certificate>>;
}

#[derive(Default)]
pub struct MemoryCertificateStore {
    records: RwLock<HashMap<String, Arc<Mutex<Certificate>>>>,
    fingerprints: Mutex<HashSet<String>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &str) -> Option<Arc<Mutex<Certificate>>> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn snapshot<P: Fn(&Certificate) -> bool>(&self, keep: P) -> Vec<Certificate> {
        let records: Vec<Arc<Mutex<Certificate>>> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        records
            .iter()
            .map(|record| record.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .filter(|certificate| keep(certificate))
            .collect()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn insert(&self, certificate: Certificate) -> CryptoResult<()> {
        let mut fingerprints = self.fingerprints.lock().unwrap_or_else(|e| e.into_inner());
        if fingerprints.contains(&certificate.fingerprint) {
            return Err(CryptoError::conflict(
                "certificate",
                &format!("fingerprint {} already issued", certificate.fingerprint),
                error_codes::FINGERPRINT_COLLISION,
            ));
        }

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&certificate.id) {
            return Err(CryptoError::conflict(
                "certificate",
                &format!("id {} already exists", certificate.id),
                error_codes::FINGERPRINT_COLLISION,
            ));
        }
        fingerprints.insert(certificate.fingerprint.clone());
        records.insert(certificate.id.clone(), Arc::new(Mutex::new(certificate)));
        Ok(())
    }

    fn get(&self, id: &str) -> CryptoResult<Option<Certificate>> {
        Ok(self
            .record(id)
            .map(|record| record.lock().unwrap_or_else(|e| e.into_inner()).clone()))
    }

    fn update(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut Certificate) -> CryptoResult<()>,
    ) -> CryptoResult<Certificate> {
        let record = self
            .record(id)
            .ok_or_else(|| CryptoError::not_found("certificate", id, error_codes::CERTIFICATE_NOT_FOUND))?;
        let mut guard = record.lock().unwrap_or_else(|e| e.into_inner());

        let mut working = guard.clone();
        f(&mut working)?;
        *guard = working.clone();
        Ok(working)
    }

    fn list_for_owner(&self, owner_id: &str) -> CryptoResult<Vec<Certificate>> {
        Ok(self.snapshot(|certificate| certificate.owner_id == owner_id))
    }

    fn list_all(&self) -> CryptoResult<Vec<Certificate>> {
        Ok(self.snapshot(|_| true))
    }
}
