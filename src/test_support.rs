//! Wiring shared by unit tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::audit::{AuditTrail, MemoryAuditSink};
use crate::certificates::CertificateRegistry;
use crate::clock::ManualClock;
use crate::config::CoreConfig;
use crate::crypto_engine::CryptoEngine;
use crate::key_store::{KeyStore, MasterKey};
use crate::rotation::KeyRotationScheduler;

pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) audit: Arc<MemoryAuditSink>,
    pub(crate) engine: Arc<CryptoEngine>,
    pub(crate) registry: Arc<CertificateRegistry>,
    pub(crate) scheduler: Arc<KeyRotationScheduler>,
}

impl Harness {
    pub(crate) fn trail(&self) -> AuditTrail {
        AuditTrail::new(self.audit.clone())
    }
}

pub(crate) fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.crypto.rsa_bits = 2048;
    config.crypto.server_secret = Some("unit-test-server-secret".to_string());
    config
}

pub(crate) fn harness() -> Harness {
    harness_with(test_config())
}

pub(crate) fn harness_with(config: CoreConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let audit = Arc::new(MemoryAuditSink::new());
    let trail = AuditTrail::new(audit.clone());

    let store = KeyStore::with_master_key(dir.path(), MasterKey::from_bytes([0x33; 32]), clock.clone()).unwrap();
    let engine = Arc::new(CryptoEngine::new(config.crypto.clone(), Arc::new(store), clock.clone()).unwrap());
    let registry = Arc::new(
        CertificateRegistry::with_memory_store(config.certificates.clone(), engine.clone(), trail.clone()).unwrap(),
    );
    let scheduler = KeyRotationScheduler::new(config.rotation.clone(), engine.clone(), registry.clone(), trail);

    Harness {
        dir,
        clock,
        audit,
        engine,
        registry,
        scheduler,
    }
}
