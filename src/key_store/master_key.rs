// Master key initialization for the key store

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::utils;

/// Application salt for stretching a configured master passphrase.
const MASTER_KEY_SALT: &[u8] = b"docseal/master-key/v1";

/// Parameters for master key derivation
#[derive(Debug, Clone)]
pub struct MasterKeyDerivationParams {
    /// Memory cost (in KB)
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
}

impl Default for MasterKeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// The key under which every stored private key is sealed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; MasterKey::LEN],
    #[zeroize(skip)]
    ephemeral: bool,
}

impl MasterKey {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; MasterKey::LEN]) -> Self {
        Self {
            bytes,
            ephemeral: false,
        }
    }

    /// Load the master key from configuration.
    ///
    /// 64 hex characters are taken as the raw key; anything else is treated
    /// as a passphrase and stretched with Argon2id. When no secret is
    /// configured an ephemeral key is generated and an error is logged: every
    /// key stored under it becomes unreadable once the process exits.
    pub fn from_config(secret: Option<&str>) -> CryptoResult<Self> {
        match secret.map(str::trim) {
            Some(secret) if !secret.is_empty() => {
                if secret.len() == MasterKey::LEN * 2 && secret.chars().all(|c| c.is_ascii_hexdigit()) {
                    let decoded = hex::decode(secret).map_err(|e| {
                        CryptoError::invalid_input("master_key", &e.to_string(), error_codes::INVALID_ENCODING)
                    })?;
                    let mut bytes = [0u8; MasterKey::LEN];
                    bytes.copy_from_slice(&decoded);
                    Ok(Self::from_bytes(bytes))
                } else {
                    Self::from_passphrase(secret, &MasterKeyDerivationParams::default())
                }
            }
            _ => Self::ephemeral(),
        }
    }

    pub fn from_passphrase(passphrase: &str, params: &MasterKeyDerivationParams) -> CryptoResult<Self> {
        let argon2_params = Params::new(
            params.memory_cost,
            params.time_cost,
            params.parallelism,
            Some(MasterKey::LEN),
        )
        .map_err(|e| {
            CryptoError::operation_failed(
                "master_key_derivation",
                &format!("Failed to build Argon2 parameters: {}", e),
                error_codes::KEY_DERIVATION_FAILED,
            )
        })?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
        let mut bytes = [0u8; MasterKey::LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), MASTER_KEY_SALT, &mut bytes)
            .map_err(|e| {
                CryptoError::operation_failed(
                    "master_key_derivation",
                    &format!("Failed to derive key: {}", e),
                    error_codes::KEY_DERIVATION_FAILED,
                )
            })?;

        Ok(Self::from_bytes(bytes))
    }

    /// A random key that lives only as long as this process.
    pub fn ephemeral() -> CryptoResult<Self> {
        log::error!(
            "no master key configured: generated an EPHEMERAL master key. \
             Private keys stored now will be permanently unreadable after restart. \
             Set DOCSEAL_MASTER_KEY for any persistent deployment."
        );
        let random = utils::random_bytes(MasterKey::LEN)?;
        let mut bytes = [0u8; MasterKey::LEN];
        bytes.copy_from_slice(&random);
        Ok(Self {
            bytes,
            ephemeral: true,
        })
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub(crate) fn as_bytes(&self) -> &[u8; MasterKey::LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}
