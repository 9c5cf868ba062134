#![no_main]

use std::sync::{Arc, OnceLock};

use arbitrary::Arbitrary;
use docseal::clock::SystemClock;
use docseal::config::CryptoConfig;
use docseal::crypto_engine::CryptoEngine;
use docseal::key_store::{KeyStore, MasterKey};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct TokenFuzzInput {
    token: String,
    document: Vec<u8>,
}

struct Fixture {
    _dir: tempfile::TempDir,
    engine: CryptoEngine,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(SystemClock);
        let store = KeyStore::with_master_key(dir.path(), MasterKey::from_bytes([0x0f; 32]), clock.clone()).unwrap();
        let config = CryptoConfig {
            rsa_bits: 2048,
            server_secret: Some("fuzz-server-secret".to_string()),
            ..CryptoConfig::default()
        };
        let engine = CryptoEngine::new(config, Arc::new(store), clock).unwrap();
        engine.ensure_key_pair("fuzzer").unwrap();
        Fixture { _dir: dir, engine }
    })
}

fuzz_target!(|input: TokenFuzzInput| {
    let engine = &fixture().engine;

    // Never panics, and only a genuine token can come back valid
    if let Ok(verification) = engine.verify_integrity_token(&input.token, &input.document) {
        assert!(!verification.is_valid());
    }
});
