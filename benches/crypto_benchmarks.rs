use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use docseal::{
    clock::{Clock, SystemClock},
    config::CryptoConfig,
    crypto_engine::{self, CryptoEngine},
    key_store::{KeyStore, MasterKey},
    secure_channel::{self, Envelope},
    secure_memory::SecureBytes,
    utils,
};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> CryptoEngine {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = KeyStore::with_master_key(dir.path(), MasterKey::from_bytes([0x5a; 32]), clock.clone()).unwrap();
    let config = CryptoConfig {
        rsa_bits: 2048,
        server_secret: Some("benchmark-server-secret".to_string()),
        ..CryptoConfig::default()
    };
    let engine = CryptoEngine::new(config, Arc::new(store), clock).unwrap();
    engine.ensure_key_pair("bench").unwrap();
    engine
}

fn rsa_benchmarks(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let mut group = c.benchmark_group("rsa");
    group.sample_size(10);

    group.bench_function("key_generation_2048", |b| b.iter(|| engine.generate_key_pair("bench-keygen")));

    let message = b"signed document hash";
    group.bench_function("sign", |b| b.iter(|| engine.sign("bench", message)));

    let signature = engine.sign("bench", message).unwrap();
    group.bench_function("verify", |b| b.iter(|| engine.verify("bench", message, &signature)));

    let public_key = engine.key_store().public_key("bench").unwrap().unwrap();
    let key = SecureBytes::from(utils::random_bytes(32).unwrap());
    group.bench_function("wrap_key", |b| b.iter(|| engine.wrap_key(&public_key, &key)));

    let wrapped = engine.wrap_key(&public_key, &key).unwrap();
    group.bench_function("unwrap_key", |b| b.iter(|| engine.unwrap_key("bench", &wrapped)));

    group.finish();
}

fn document_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("aes-gcm");

    for size in [1_000usize, 100_000, 1_000_000].iter() {
        let data = vec![0u8; *size];
        group.bench_with_input(BenchmarkId::new("encrypt_document", size), &data, |b, data| {
            b.iter(|| crypto_engine::encrypt_document(data))
        });

        let sealed = crypto_engine::encrypt_document(&data).unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt_document", size), &sealed, |b, sealed| {
            b.iter(|| {
                crypto_engine::decrypt_document(&sealed.ciphertext, sealed.key.as_bytes(), &sealed.iv, &sealed.auth_tag)
            })
        });
    }

    group.finish();
}

fn envelope_benchmarks(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let public_key = engine.key_store().public_key("bench").unwrap().unwrap();
    let message = vec![0x42u8; 4096];
    let mut group = c.benchmark_group("envelope");
    group.sample_size(20);

    group.bench_function("seal", |b| {
        b.iter(|| secure_channel::seal(&engine, &public_key, &message, SystemClock.now()))
    });

    let envelope = secure_channel::seal(&engine, &public_key, &message, SystemClock.now()).unwrap();
    group.bench_function("open", |b| b.iter(|| secure_channel::open(&engine, "bench", &envelope)));

    let encoded = envelope.encode().unwrap();
    group.bench_function("decode", |b| b.iter(|| Envelope::decode(&encoded, 1 << 20)));

    group.finish();
}

fn utils_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("utils");

    for size in [32, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("random_bytes", size), size, |b, &size| {
            b.iter(|| utils::random_bytes(size))
        });
    }

    let data1 = utils::random_bytes(1000).unwrap();
    let data2 = data1.clone();
    group.bench_function("constant_time_eq", |b| b.iter(|| utils::constant_time_eq(&data1, &data2)));

    let document = vec![0x17u8; 1_000_000];
    group.bench_function("sha256_1mb", |b| b.iter(|| utils::sha256_hex(&document)));

    group.bench_function("secure_zero", |b| {
        b.iter(|| {
            let mut data = vec![0xFF; 1000];
            utils::secure_zero(&mut data);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    rsa_benchmarks,
    document_benchmarks,
    envelope_benchmarks,
    utils_benchmarks
);
criterion_main!(benches);
