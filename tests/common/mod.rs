#![allow(dead_code)]

use std::sync::Arc;

use docseal::audit::MemoryAuditSink;
use docseal::clock::ManualClock;
use docseal::config::CoreConfig;
use docseal::directory::{MemoryUserDirectory, User};
use docseal::service::{DocSealService, Principal};
use tempfile::TempDir;

pub struct TestService {
    pub service: DocSealService,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
    pub directory: Arc<MemoryUserDirectory>,
    pub dir: TempDir,
}

pub fn config(dir: &TempDir) -> CoreConfig {
    let mut config = CoreConfig::default();
    config.crypto.rsa_bits = 2048;
    config.crypto.server_secret = Some("integration-test-server-secret".to_string());
    config.key_store.directory = dir.path().to_path_buf();
    config.key_store.master_key = Some("42".repeat(32));
    config
}

pub fn service() -> TestService {
    service_with(|_| {})
}

pub fn service_with(adjust: impl FnOnce(&mut CoreConfig)) -> TestService {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    adjust(&mut config);

    let directory = Arc::new(MemoryUserDirectory::new());
    for (id, is_admin) in [("alice", false), ("bob", false), ("carol", false), ("admin", true)] {
        directory.insert(User {
            id: id.to_string(),
            email: format!("{}@example.org", id),
            is_admin,
        });
    }
    let clock = Arc::new(ManualClock::default());
    let audit = Arc::new(MemoryAuditSink::new());

    let service = DocSealService::with_clock(config, directory.clone(), audit.clone(), clock.clone()).unwrap();
    TestService {
        service,
        clock,
        audit,
        directory,
        dir,
    }
}

pub fn user(id: &str) -> Principal {
    Principal::new(id)
}

pub fn admin() -> Principal {
    Principal::admin("admin")
}
