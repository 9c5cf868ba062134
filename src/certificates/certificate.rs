use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Pending,
    Active,
    Expired,
    Revoked,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Pending => "pending",
            CertificateStatus::Active => "active",
            CertificateStatus::Expired => "expired",
            CertificateStatus::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CertificateStatus::Expired | CertificateStatus::Revoked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    /// Broader than a single key: every principal's key is rotated.
    SecurityIncident,
    /// Replaced by a successor after key rotation.
    Superseded,
    CessationOfOperation,
    AffiliationChanged,
    PrivilegeWithdrawn,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "key_compromise",
            RevocationReason::SecurityIncident => "security_incident",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessation_of_operation",
            RevocationReason::AffiliationChanged => "affiliation_changed",
            RevocationReason::PrivilegeWithdrawn => "privilege_withdrawn",
        }
    }

    /// Revocations after which the owner's key must not stay in use.
    pub fn requires_rotation(&self) -> bool {
        matches!(self, RevocationReason::KeyCompromise | RevocationReason::SecurityIncident)
    }

    pub fn raises_breach(&self) -> bool {
        matches!(self, RevocationReason::SecurityIncident)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_sign: bool,
    pub can_encrypt: bool,
    pub can_authenticate: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_sign: true,
            can_encrypt: true,
            can_authenticate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Standard,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
    pub details: Option<String>,
    pub revoked_by: String,
}

/// Issuance metadata, tagged by schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case", deny_unknown_fields)]
pub enum CertificateMetadata {
    V1 {
        key_algorithm: String,
        issued_by: String,
        purpose: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub owner_id: String,
    pub public_key_hash: String,
    pub key_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: CertificateStatus,
    pub fingerprint: String,
    pub capabilities: Capabilities,
    pub security_level: SecurityLevel,
    pub rotation_generation: u32,
    /// Present iff `status` is `Revoked`.
    pub revocation: Option<Revocation>,
    pub metadata: CertificateMetadata,
    pub parent_certificate_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl Certificate {
    /// Status as of `now`, applying pending time-based transitions.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CertificateStatus {
        match self.status {
            CertificateStatus::Pending | CertificateStatus::Active if now > self.valid_until => {
                CertificateStatus::Expired
            }
            CertificateStatus::Pending if now >= self.valid_from => CertificateStatus::Active,
            status => status,
        }
    }

    /// Apply time-based transitions in place. Returns whether the status
    /// changed.
    pub(crate) fn refresh_status(&mut self, now: DateTime<Utc>) -> bool {
        let status = self.effective_status(now);
        let changed = status != self.status;
        self.status = status;
        changed
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == CertificateStatus::Active
    }
}

/// Certificate request parameters beyond owner and validity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueOptions {
    /// Issue `Pending` until this instant.
    pub not_before: Option<DateTime<Utc>>,
    pub capabilities: Option<Capabilities>,
    pub security_level: Option<SecurityLevel>,
    pub purpose: Option<String>,
}

/// Public key with PEM armour and all whitespace removed, so every
/// re-encoding of the same key normalizes identically.
pub fn normalize_public_key(public_key_pem: &str) -> String {
    public_key_pem
        .lines()
        .filter(|line| !line.trim_start().starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// SHA-256 of the normalized public key.
pub fn public_key_hash(public_key_pem: &str) -> String {
    utils::sha256_hex(normalize_public_key(public_key_pem).as_bytes())
}

/// Short identifier of a public key.
pub fn key_id(public_key_hash: &str) -> String {
    public_key_hash.chars().take(16).collect()
}

/// Binds key, owner and issuance instant.
pub fn fingerprint(public_key_pem: &str, owner_id: &str, issued_at: DateTime<Utc>) -> String {
    let material = format!(
        "{}:{}:{}",
        normalize_public_key(public_key_pem),
        owner_id,
        issued_at.timestamp_nanos_opt().unwrap_or_else(|| issued_at.timestamp_micros())
    );
    utils::sha256_hex(material.as_bytes())
}

/// Outcome of a certificate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationFailure {
    NotFound,
    Pending,
    Expired,
    Revoked { reason: RevocationReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateVerification {
    pub valid: bool,
    pub certificate_id: Option<String>,
    pub status: Option<CertificateStatus>,
    pub failure: Option<VerificationFailure>,
}

impl CertificateVerification {
    pub(crate) fn not_found() -> Self {
        Self {
            valid: false,
            certificate_id: None,
            status: None,
            failure: Some(VerificationFailure::NotFound),
        }
    }

    pub(crate) fn of(certificate: &Certificate) -> Self {
        let failure = match certificate.status {
            CertificateStatus::Active => None,
            CertificateStatus::Pending => Some(VerificationFailure::Pending),
            CertificateStatus::Expired => Some(VerificationFailure::Expired),
            CertificateStatus::Revoked => Some(VerificationFailure::Revoked {
                reason: certificate
                    .revocation
                    .as_ref()
                    .map(|r| r.reason)
                    .unwrap_or(RevocationReason::Unspecified),
            }),
        };
        Self {
            valid: failure.is_none(),
            certificate_id: Some(certificate.id.clone()),
            status: Some(certificate.status),
            failure,
        }
    }
}
