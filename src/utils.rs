use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{error_codes, CryptoError, CryptoResult};

/// Longest accepted principal identifier.
pub const MAX_OWNER_ID_LEN: usize = 128;

/// Generate random bytes of the specified length
pub fn random_bytes(length: usize) -> CryptoResult<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::operation_failed("random_bytes", &e.to_string(), error_codes::KEY_GENERATION_FAILED))?;
    Ok(bytes)
}

/// Constant-time comparison of two byte slices to avoid timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// Securely zero out sensitive data from memory
pub fn secure_zero(data: &mut [u8]) {
    data.zeroize();
}

/// SHA-256 of `data` as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reject empty, oversized or oddly-shaped principal identifiers.
///
/// Identifiers end up in AEAD associated data, signed payloads and logs,
/// so only `[A-Za-z0-9._@:-]` is accepted.
pub fn validate_owner_id(owner_id: &str) -> CryptoResult<()> {
    if owner_id.trim().is_empty() {
        return Err(CryptoError::invalid_input(
            "owner_id",
            "must not be empty",
            error_codes::INVALID_OWNER_ID,
        ));
    }
    if owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(CryptoError::invalid_input(
            "owner_id",
            &format!("longer than {} bytes", MAX_OWNER_ID_LEN),
            error_codes::INVALID_OWNER_ID,
        ));
    }
    let valid = owner_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | ':' | '-'));
    if !valid {
        return Err(CryptoError::invalid_input(
            "owner_id",
            "contains unsupported characters",
            error_codes::INVALID_OWNER_ID,
        ));
    }
    Ok(())
}

/// Decode standard base64, reporting which field was malformed.
pub fn decode_base64(field: &str, value: &str) -> CryptoResult<Vec<u8>> {
    base64::decode(value.trim()).map_err(|e| {
        CryptoError::invalid_input(field, &format!("invalid base64: {}", e), error_codes::INVALID_ENCODING)
    })
}

/// Run a CPU-bound operation on a worker thread with a hard deadline.
///
/// The caller gets a definite answer within `timeout`: either the worker's
/// result or `CryptoError::Timeout`. A worker that misses the deadline is
/// abandoned and its eventual result discarded.
pub fn run_with_deadline<T, F>(operation: &str, timeout: Duration, f: F) -> CryptoResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CryptoResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("docseal-{}", operation))
        .spawn(move || {
            // The receiver may already be gone after a timeout.
            let _ = tx.send(f());
        })
        .map_err(|e| CryptoError::operation_failed(operation, &e.to_string(), error_codes::WORKER_FAILED))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{} exceeded its {} ms deadline", operation, timeout.as_millis());
            Err(CryptoError::timeout(operation, timeout.as_millis() as u64))
        }
        Err(RecvTimeoutError::Disconnected) => Err(CryptoError::operation_failed(
            operation,
            "worker terminated without a result",
            error_codes::WORKER_FAILED,
        )),
    }
}
