//! Self-describing integrity tokens.
//!
//! A token is `base64(JSON { claims, signature })` where `signature` is the
//! owner's RSA signature over the canonical JSON of `claims`. The field order
//! of `IntegrityClaims` is fixed, so re-serializing parsed claims reproduces
//! the signed bytes exactly.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CryptoResult;

pub const INTEGRITY_TOKEN_VERSION: u8 = 1;

/// Upper bound on an encoded token accepted for verification.
pub const MAX_TOKEN_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrityClaims {
    pub version: u8,
    pub document_id: String,
    pub owner_id: String,
    /// Short id of the signing key, so a token signed before a rotation is
    /// told apart from a forgery.
    pub key_id: String,
    /// SHA-256 of the document, lowercase hex.
    pub hash: String,
    pub timestamp_ms: i64,
}

impl IntegrityClaims {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }

    pub(crate) fn signing_bytes(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignedToken {
    claims: IntegrityClaims,
    signature: String,
}

pub(crate) fn encode_token(claims: &IntegrityClaims, signature: &[u8]) -> CryptoResult<String> {
    let token = SignedToken {
        claims: claims.clone(),
        signature: base64::encode(signature),
    };
    Ok(base64::encode(serde_json::to_vec(&token)?))
}

/// Parse a token into its claims and raw signature. The error string says
/// what was wrong with the token's shape.
pub(crate) fn decode_token(token: &str) -> Result<(IntegrityClaims, Vec<u8>), String> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(format!("token longer than {} bytes", MAX_TOKEN_LEN));
    }
    let json = base64::decode(token.trim()).map_err(|e| format!("token is not base64: {}", e))?;
    let parsed: SignedToken = serde_json::from_slice(&json).map_err(|e| format!("token is not valid JSON: {}", e))?;
    if parsed.claims.version != INTEGRITY_TOKEN_VERSION {
        return Err(format!("unsupported token version {}", parsed.claims.version));
    }
    if parsed.claims.timestamp().is_none() {
        return Err("timestamp out of range".to_string());
    }
    let signature = base64::decode(&parsed.signature).map_err(|e| format!("signature is not base64: {}", e))?;
    Ok((parsed.claims, signature))
}

/// Why a token did or did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Valid,
    /// The signature is genuine but the presented bytes differ from the
    /// signed hash: the document was modified.
    ContentMismatch,
    /// The signature does not verify under the owner's key: the token was
    /// forged or altered.
    BadSignature,
    /// The signature does not verify under the owner's current key, and the
    /// token names an earlier key. It cannot be checked any more.
    KeySuperseded,
    /// No public key is on record for the claimed owner.
    UnknownSigner,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityVerification {
    pub status: IntegrityStatus,
    pub claims: Option<IntegrityClaims>,
    pub detail: Option<String>,
}

impl IntegrityVerification {
    pub fn is_valid(&self) -> bool {
        self.status == IntegrityStatus::Valid
    }

    pub(crate) fn malformed(detail: String) -> Self {
        Self {
            status: IntegrityStatus::Malformed,
            claims: None,
            detail: Some(detail),
        }
    }

    pub(crate) fn with_claims(status: IntegrityStatus, claims: IntegrityClaims, detail: Option<&str>) -> Self {
        Self {
            status,
            claims: Some(claims),
            detail: detail.map(str::to_string),
        }
    }
}
