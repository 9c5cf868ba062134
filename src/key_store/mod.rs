/*!
 * Key Store for per-principal asymmetric key pairs
 *
 * Each principal's key pair is persisted as a single record file: the public
 * key in the clear and the private key sealed with ChaCha20-Poly1305 under a
 * process master key. Writes go through a temporary file and an atomic
 * rename, so a reader never sees a half-written pair.
 */

mod master_key;
mod storage;


use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::secure_memory::SecureBytes;

pub use master_key::{MasterKey, MasterKeyDerivationParams};
pub use storage::KeyStore;

/// A principal's key pair as held in memory.
///
/// `private_key` is the passphrase-protected PKCS#8 PEM produced by the
/// crypto engine; it is never the bare private key.
#[derive(Clone)]
pub struct KeyPair {
    pub owner_id: String,
    pub public_key_pem: String,
    pub private_key: SecureBytes,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("owner_id", &self.owner_id)
            .field("public_key_pem", &self.public_key_pem)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Metadata readable without touching private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyInfo {
    pub owner_id: String,
    /// When the current key pair was stored.
    pub created_at: DateTime<Utc>,
    /// 1 for the first key pair, incremented on every rotation.
    pub generation: u32,
}

impl StoredKeyInfo {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}
