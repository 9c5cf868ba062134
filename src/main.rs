use std::sync::Arc;

use docseal::audit::LogAuditSink;
use docseal::config::CoreConfig;
use docseal::directory::MemoryUserDirectory;
use docseal::error::CryptoResult;
use docseal::service::{DocSealService, Principal};

/// Operator entry point: sweep expired certificates and report the state of
/// the certificate registry and key rotation.
fn main() {
    if let Err(e) = run() {
        eprintln!("docseal: [{}] {}", e.error_type(), e);
        std::process::exit(1);
    }
}

fn run() -> CryptoResult<()> {
    let config = CoreConfig::from_env()?;
    println!("Opening key store at {}", config.key_store.directory.display());

    let service = DocSealService::open(
        config,
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(LogAuditSink),
    )?;
    if service.engine().key_store().is_master_key_ephemeral() {
        eprintln!("WARNING: no DOCSEAL_MASTER_KEY set; stored private keys will be unreadable after exit");
    }
    if service.engine().is_server_secret_ephemeral() {
        eprintln!("WARNING: no DOCSEAL_SERVER_SECRET set; private keys created now cannot be unlocked after exit");
    }

    let operator = Principal::admin("operator");
    let expired = service.cleanup_expired(&operator)?;
    println!("Expired certificates swept: {}", expired);

    let certificates = service.certificate_stats(&operator)?;
    println!("\n=== Certificates ===");
    println!("{}", serde_json::to_string_pretty(&certificates)?);

    let rotation = service.rotation_stats(&operator)?;
    println!("\n=== Key rotation ===");
    println!("{}", serde_json::to_string_pretty(&rotation)?);
    if rotation.overdue > 0 {
        println!("\n{} key pair(s) are past the {}-day rotation age", rotation.overdue, rotation.rotation_frequency_days);
    }

    Ok(())
}
