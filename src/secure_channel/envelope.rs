//! Hybrid encryption envelope.
//!
//! A one-time AES-256-GCM key encrypts the message; the key itself is
//! wrapped with RSA-OAEP-SHA256 to the recipient. `sessionId`, `timestamp`
//! and `keyId` are bound into the GCM associated data, so rewriting the
//! header (for instance to slip past the replay window) fails
//! authentication.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certificates;
use crate::crypto_engine::{CryptoEngine, DocumentCipher, DOCUMENT_KEY_LEN, IV_LEN, TAG_LEN};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::secure_memory::SecureBytes;
use crate::utils;

pub const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeAlgorithm {
    #[serde(rename = "RSA-OAEP-256+A256GCM")]
    RsaOaep256A256Gcm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    pub version: u8,
    /// Base64 RSA-OAEP wrap of the one-time key.
    pub encrypted_session_key: String,
    /// Base64 of ciphertext followed by the 16-byte GCM tag.
    pub encrypted_content: String,
    pub iv: String,
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Key id of the recipient public key the session key is wrapped to.
    pub key_id: String,
    pub algorithm: EnvelopeAlgorithm,
}

impl Envelope {
    /// Opaque transport form: base64 of the JSON structure.
    pub fn encode(&self) -> CryptoResult<String> {
        Ok(base64::encode(serde_json::to_vec(self)?))
    }

    /// Parse an encoded envelope. The length limit applies before any
    /// decoding.
    pub fn decode(encoded: &str, max_bytes: usize) -> CryptoResult<Self> {
        if encoded.len() > max_bytes {
            return Err(CryptoError::invalid_input(
                "envelope",
                &format!("larger than {} bytes", max_bytes),
                error_codes::PAYLOAD_TOO_LARGE,
            ));
        }
        let json = base64::decode(encoded.trim()).map_err(|e| malformed(&format!("not base64: {}", e)))?;
        let envelope: Envelope =
            serde_json::from_slice(&json).map_err(|e| malformed(&format!("invalid structure: {}", e)))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(malformed(&format!("unsupported version {}", envelope.version)));
        }
        for (field, value) in [
            ("encryptedSessionKey", &envelope.encrypted_session_key),
            ("encryptedContent", &envelope.encrypted_content),
            ("iv", &envelope.iv),
            ("sessionId", &envelope.session_id),
            ("keyId", &envelope.key_id),
        ] {
            if value.trim().is_empty() {
                return Err(malformed(&format!("missing {}", field)));
            }
        }
        if envelope.sent_at().is_none() {
            return Err(malformed("timestamp out of range"));
        }
        Ok(envelope)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    pub(crate) fn associated_data(&self) -> Vec<u8> {
        format!("{}|{}|{}", self.session_id, self.timestamp, self.key_id).into_bytes()
    }
}

fn malformed(reason: &str) -> CryptoError {
    CryptoError::invalid_input("envelope", reason, error_codes::MALFORMED_ENVELOPE)
}

/// Encrypt `message` to the holder of `recipient_public_key_pem` under a
/// fresh one-time key and IV.
pub fn seal(
    engine: &CryptoEngine,
    recipient_public_key_pem: &str,
    message: &[u8],
    sent_at: DateTime<Utc>,
) -> CryptoResult<Envelope> {
    if message.is_empty() {
        return Err(CryptoError::invalid_input("message", "must not be empty", error_codes::EMPTY_PAYLOAD));
    }

    let session_key = SecureBytes::from(utils::random_bytes(DOCUMENT_KEY_LEN)?);
    let iv = utils::random_bytes(IV_LEN)?;
    let wrapped = engine.wrap_key(recipient_public_key_pem, &session_key)?;

    let mut envelope = Envelope {
        version: ENVELOPE_VERSION,
        encrypted_session_key: base64::encode(wrapped),
        encrypted_content: String::new(),
        iv: base64::encode(&iv),
        session_id: Uuid::new_v4().to_string(),
        timestamp: sent_at.timestamp_millis(),
        key_id: certificates::key_id(&certificates::public_key_hash(recipient_public_key_pem)),
        algorithm: EnvelopeAlgorithm::RsaOaep256A256Gcm,
    };

    let (mut content, tag) =
        DocumentCipher::new(session_key.as_bytes())?.encrypt(&iv, &envelope.associated_data(), message)?;
    content.extend_from_slice(&tag);
    envelope.encrypted_content = base64::encode(content);
    Ok(envelope)
}

/// Decrypt an envelope addressed to `recipient_owner_id`'s key.
pub fn open(engine: &CryptoEngine, recipient_owner_id: &str, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
    let wrapped = utils::decode_base64("encryptedSessionKey", &envelope.encrypted_session_key)?;
    let iv = utils::decode_base64("iv", &envelope.iv)?;
    let content = utils::decode_base64("encryptedContent", &envelope.encrypted_content)?;
    if content.len() < TAG_LEN {
        return Err(malformed("content shorter than the authentication tag"));
    }

    let session_key = engine.unwrap_key(recipient_owner_id, &wrapped)?;
    let (ciphertext, tag) = content.split_at(content.len() - TAG_LEN);
    DocumentCipher::new(session_key.as_bytes())?.decrypt(&iv, &envelope.associated_data(), ciphertext, tag)
}
