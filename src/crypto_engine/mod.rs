/*!
 * Cryptographic primitives used by every other component
 *
 * - RSA key pairs whose private half is a passphrase-protected PKCS#8 PEM
 * - RSASSA-PKCS1-v1_5 / SHA-256 signatures, base64 on the wire
 * - AES-256-GCM document encryption with a fresh key and IV per call
 * - SHA-256 hashing and signed integrity tokens
 * - RSA-OAEP key wrapping for the secure channel
 *
 * Every RSA operation runs on a worker thread under a deadline
 * (`utils::run_with_deadline`) and yields `CryptoError::Timeout` instead of
 * blocking a caller indefinitely.
 */

mod document;
mod integrity;
mod keys;
mod signature;
mod tamper;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::certificates;
use crate::clock::Clock;
use crate::config::{CryptoConfig, MIN_RSA_BITS};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::key_store::{KeyPair, KeyStore};
use crate::secure_memory::SecureBytes;
use crate::utils;

pub use document::{decrypt_document, encrypt_document, DocumentCipher, EncryptedDocument, DOCUMENT_KEY_LEN, IV_LEN, TAG_LEN};
pub use integrity::{IntegrityClaims, IntegrityStatus, IntegrityVerification, INTEGRITY_TOKEN_VERSION, MAX_TOKEN_LEN};
pub use keys::{derive_passphrase, parse_public_key, ENCRYPTED_PRIVATE_KEY_LABEL};
pub use tamper::{analyze_pdf, TamperAdvisory, TamperIndicator};

pub struct CryptoEngine {
    config: CryptoConfig,
    server_secret: SecureBytes,
    server_secret_ephemeral: bool,
    key_store: Arc<KeyStore>,
    clock: Arc<dyn Clock>,
    provision_lock: Mutex<()>,
}

impl CryptoEngine {
    pub fn new(config: CryptoConfig, key_store: Arc<KeyStore>, clock: Arc<dyn Clock>) -> CryptoResult<Self> {
        if config.rsa_bits < MIN_RSA_BITS {
            return Err(CryptoError::invalid_input(
                "rsa_bits",
                &format!("must be at least {}", MIN_RSA_BITS),
                error_codes::INVALID_PARAMETER,
            ));
        }

        let (server_secret, server_secret_ephemeral) = match config.server_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => (SecureBytes::new(secret.as_bytes()), false),
            _ => {
                log::error!(
                    "no server secret configured: private keys generated by this process, \
                     the server identity's included, cannot be unlocked after restart"
                );
                (SecureBytes::from(hex::encode(utils::random_bytes(32)?)), true)
            }
        };

        Ok(Self {
            config,
            server_secret,
            server_secret_ephemeral,
            key_store,
            clock,
            provision_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    /// True when the passphrase secret was generated for this process only.
    pub fn is_server_secret_ephemeral(&self) -> bool {
        self.server_secret_ephemeral
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Passphrase protecting `owner_id`'s private key encoding.
    pub fn derive_passphrase(&self, owner_id: &str) -> CryptoResult<SecureBytes> {
        keys::derive_passphrase(self.server_secret.as_bytes(), owner_id)
    }

    /// Generate a fresh key pair for `owner_id`. The pair is returned, not
    /// stored.
    pub fn generate_key_pair(&self, owner_id: &str) -> CryptoResult<KeyPair> {
        utils::validate_owner_id(owner_id)?;
        let passphrase = self.derive_passphrase(owner_id)?;
        let owner = owner_id.to_string();
        let bits = self.config.rsa_bits;

        let key_pair = utils::run_with_deadline("generate_key_pair", self.config.keygen_timeout(), move || {
            keys::generate_rsa_key_pair(&owner, bits, &passphrase)
        })?;
        log::debug!("generated {}-bit key pair for {}", bits, owner_id);
        Ok(key_pair)
    }

    /// Public key of `owner_id`, generating and storing a key pair first when
    /// none exists. Returns the PEM and whether a pair was generated.
    pub fn ensure_key_pair(&self, owner_id: &str) -> CryptoResult<(String, bool)> {
        if let Some(public_key_pem) = self.key_store.public_key(owner_id)? {
            return Ok((public_key_pem, false));
        }

        let key_pair = self.generate_key_pair(owner_id)?;

        // Another request may have provisioned the owner while we generated.
        let _guard = self.provision_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(public_key_pem) = self.key_store.public_key(owner_id)? {
            return Ok((public_key_pem, false));
        }
        self.key_store
            .put(owner_id, &key_pair.public_key_pem, &key_pair.private_key)?;
        log::info!("provisioned key pair for {}", owner_id);
        Ok((key_pair.public_key_pem.clone(), true))
    }

    /// Decode a stored key pair's private half.
    pub fn unlock_private_key(&self, key_pair: &KeyPair) -> CryptoResult<RsaPrivateKey> {
        let passphrase = self.derive_passphrase(&key_pair.owner_id)?;
        keys::decode_protected_private_key(&key_pair.private_key, &passphrase)
    }

    pub fn sign(&self, owner_id: &str, data: &[u8]) -> CryptoResult<String> {
        utils::validate_owner_id(owner_id)?;
        self.check_payload("data", data)?;
        let data = data.to_vec();
        let signature = self.with_private_key("sign", owner_id, move |key| signature::sign_with_key(key, &data))?;
        Ok(base64::encode(signature))
    }

    pub fn sign_with_key(&self, private_key: &RsaPrivateKey, data: &[u8]) -> CryptoResult<String> {
        self.check_payload("data", data)?;
        let key = private_key.clone();
        let data = data.to_vec();
        let signature = utils::run_with_deadline("sign", self.operation_timeout(), move || {
            signature::sign_with_key(&key, &data)
        })?;
        Ok(base64::encode(signature))
    }

    /// Verify a base64 signature made by `owner_id`'s current key.
    pub fn verify(&self, owner_id: &str, data: &[u8], signature: &str) -> CryptoResult<bool> {
        utils::validate_owner_id(owner_id)?;
        let public_key_pem = self
            .key_store
            .public_key(owner_id)?
            .ok_or_else(|| CryptoError::not_found("key pair", owner_id, error_codes::KEY_NOT_FOUND))?;
        self.verify_with_public_key(&public_key_pem, data, signature)
    }

    pub fn verify_with_public_key(&self, public_key_pem: &str, data: &[u8], signature: &str) -> CryptoResult<bool> {
        self.check_payload("data", data)?;
        let signature = utils::decode_base64("signature", signature)?;
        let public_key = keys::parse_public_key(public_key_pem)?;
        self.verify_raw(public_key, data, signature)
    }

    fn verify_raw(&self, public_key: RsaPublicKey, data: &[u8], signature: Vec<u8>) -> CryptoResult<bool> {
        let data = data.to_vec();
        utils::run_with_deadline("verify", self.operation_timeout(), move || {
            signature::verify_with_public_key(&public_key, &data, &signature)
        })
    }

    pub fn encrypt_document(&self, plaintext: &[u8]) -> CryptoResult<EncryptedDocument> {
        self.check_payload("document", plaintext)?;
        document::encrypt_document(plaintext)
    }

    pub fn decrypt_document(&self, ciphertext: &[u8], key: &[u8], iv: &[u8], auth_tag: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_payload("ciphertext", ciphertext)?;
        document::decrypt_document(ciphertext, key, iv, auth_tag)
    }

    /// SHA-256, lowercase hex.
    pub fn hash(&self, data: &[u8]) -> String {
        utils::sha256_hex(data)
    }

    pub fn issue_integrity_token(&self, document_id: &str, owner_id: &str, document: &[u8]) -> CryptoResult<String> {
        if document_id.trim().is_empty() {
            return Err(CryptoError::invalid_input(
                "document_id",
                "must not be empty",
                error_codes::INVALID_PARAMETER,
            ));
        }
        utils::validate_owner_id(owner_id)?;
        self.check_payload("document", document)?;

        let key_pair = self.load_key_pair(owner_id)?;
        let claims = IntegrityClaims {
            version: INTEGRITY_TOKEN_VERSION,
            document_id: document_id.to_string(),
            owner_id: owner_id.to_string(),
            key_id: key_id_of(&key_pair.public_key_pem),
            hash: self.hash(document),
            timestamp_ms: self.clock.now().timestamp_millis(),
        };
        let signed = claims.signing_bytes()?;
        let signature = self.with_key_pair("issue_integrity_token", key_pair, move |key| {
            signature::sign_with_key(key, &signed)
        })?;
        integrity::encode_token(&claims, &signature)
    }

    /// Check a token against the presented document bytes.
    ///
    /// Token problems are reported through `IntegrityVerification::status`;
    /// `Err` is reserved for operational failures such as timeouts.
    pub fn verify_integrity_token(&self, token: &str, document: &[u8]) -> CryptoResult<IntegrityVerification> {
        let (claims, signature) = match integrity::decode_token(token) {
            Ok(decoded) => decoded,
            Err(detail) => return Ok(IntegrityVerification::malformed(detail)),
        };
        if utils::validate_owner_id(&claims.owner_id).is_err() {
            return Ok(IntegrityVerification::malformed("invalid owner id".to_string()));
        }

        let public_key_pem = match self.key_store.public_key(&claims.owner_id)? {
            Some(pem) => pem,
            None => {
                return Ok(IntegrityVerification::with_claims(
                    IntegrityStatus::UnknownSigner,
                    claims,
                    Some("no public key on record for owner"),
                ))
            }
        };
        let public_key = keys::parse_public_key(&public_key_pem)?;

        let signed = claims.signing_bytes()?;
        let signature_ok = match self.verify_raw(public_key, &signed, signature) {
            Ok(ok) => ok,
            Err(CryptoError::InvalidInput { .. }) => false,
            Err(e) => return Err(e),
        };
        if !signature_ok && claims.key_id != key_id_of(&public_key_pem) {
            return Ok(IntegrityVerification::with_claims(
                IntegrityStatus::KeySuperseded,
                claims,
                Some("signed with a key that has since been rotated out"),
            ));
        }
        if !signature_ok {
            return Ok(IntegrityVerification::with_claims(
                IntegrityStatus::BadSignature,
                claims,
                Some("signature does not match the owner's key"),
            ));
        }

        let presented = self.hash(document);
        if !utils::constant_time_eq(presented.as_bytes(), claims.hash.as_bytes()) {
            return Ok(IntegrityVerification::with_claims(
                IntegrityStatus::ContentMismatch,
                claims,
                Some("document hash differs from the signed hash"),
            ));
        }

        Ok(IntegrityVerification::with_claims(IntegrityStatus::Valid, claims, None))
    }

    /// RSA-OAEP-SHA256 wrap of a symmetric key to `public_key_pem`.
    pub fn wrap_key(&self, public_key_pem: &str, key: &SecureBytes) -> CryptoResult<Vec<u8>> {
        let public_key = keys::parse_public_key(public_key_pem)?;
        let key = key.clone();
        utils::run_with_deadline("wrap_key", self.operation_timeout(), move || {
            signature::wrap_key(&public_key, &key)
        })
    }

    /// Unwrap a key that was wrapped to `owner_id`'s public key.
    pub fn unwrap_key(&self, owner_id: &str, wrapped: &[u8]) -> CryptoResult<SecureBytes> {
        let wrapped = wrapped.to_vec();
        self.with_private_key("unwrap_key", owner_id, move |key| signature::unwrap_key(key, &wrapped))
    }

    pub fn analyze_pdf(&self, document: &[u8]) -> TamperAdvisory {
        tamper::analyze_pdf(document)
    }

    fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout()
    }

    fn check_payload(&self, parameter: &str, data: &[u8]) -> CryptoResult<()> {
        if data.is_empty() {
            return Err(CryptoError::invalid_input(parameter, "must not be empty", error_codes::EMPTY_PAYLOAD));
        }
        if data.len() > self.config.max_payload_bytes {
            return Err(CryptoError::invalid_input(
                parameter,
                &format!("larger than {} bytes", self.config.max_payload_bytes),
                error_codes::PAYLOAD_TOO_LARGE,
            ));
        }
        Ok(())
    }

    /// Load, unlock and use `owner_id`'s private key on a deadline-bound
    /// worker. The decoded key never leaves the worker.
    fn load_key_pair(&self, owner_id: &str) -> CryptoResult<KeyPair> {
        self.key_store
            .get(owner_id)?
            .ok_or_else(|| CryptoError::not_found("key pair", owner_id, error_codes::KEY_NOT_FOUND))
    }

    fn with_private_key<T, F>(&self, operation: &str, owner_id: &str, f: F) -> CryptoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RsaPrivateKey) -> CryptoResult<T> + Send + 'static,
    {
        let key_pair = self.load_key_pair(owner_id)?;
        self.with_key_pair(operation, key_pair, f)
    }

    fn with_key_pair<T, F>(&self, operation: &str, key_pair: KeyPair, f: F) -> CryptoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RsaPrivateKey) -> CryptoResult<T> + Send + 'static,
    {
        let passphrase = self.derive_passphrase(&key_pair.owner_id)?;

        utils::run_with_deadline(operation, self.operation_timeout(), move || {
            let private_key = keys::decode_protected_private_key(&key_pair.private_key, &passphrase)?;
            f(&private_key)
        })
    }
}

fn key_id_of(public_key_pem: &str) -> String {
    certificates::key_id(&certificates::public_key_hash(public_key_pem))
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("config", &self.config)
            .field("server_secret", &"[REDACTED]")
            .finish()
    }
}
