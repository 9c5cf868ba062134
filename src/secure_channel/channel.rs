use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::challenge::{Challenge, ChallengeBook};
use super::envelope::{self, Envelope};
use super::session::{SessionCache, SessionEntry, SessionInfo};
use crate::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::certificates::{self, CertificateRegistry};
use crate::clock::{self, Clock};
use crate::config::ChannelConfig;
use crate::crypto_engine::{CryptoEngine, DOCUMENT_KEY_LEN, IV_LEN};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::secure_memory::SecureBytes;
use crate::tasks::PeriodicTask;
use crate::utils;

const CHALLENGE_LEN: usize = 32;

/// Response to a session-initiation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub server_public_key: String,
    pub session: SessionInfo,
    pub challenge: Challenge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sessions: usize,
    pub challenges: usize,
}

/// Message exchange between untrusted clients and the server.
///
/// The server's own key pair lives in the key store under
/// `ChannelConfig::server_identity` and is created on first use.
pub struct SecureChannel {
    config: ChannelConfig,
    engine: Arc<CryptoEngine>,
    registry: Arc<CertificateRegistry>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    sessions: SessionCache,
    challenges: ChallengeBook,
}

impl SecureChannel {
    pub fn new(
        config: ChannelConfig,
        engine: Arc<CryptoEngine>,
        registry: Arc<CertificateRegistry>,
        audit: AuditTrail,
    ) -> CryptoResult<Self> {
        utils::validate_owner_id(&config.server_identity)?;
        let (_, generated) = engine.ensure_key_pair(&config.server_identity)?;
        if generated {
            log::info!("generated server key pair for {}", config.server_identity);
        }
        let clock = engine.clock().clone();

        Ok(Self {
            config,
            engine,
            registry,
            audit,
            clock,
            sessions: SessionCache::default(),
            challenges: ChallengeBook::default(),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The server's current public key (SPKI PEM).
    pub fn server_public_key(&self) -> CryptoResult<String> {
        self.engine
            .key_store()
            .public_key(&self.config.server_identity)?
            .ok_or_else(|| {
                CryptoError::not_found("server key pair", &self.config.server_identity, error_codes::KEY_NOT_FOUND)
            })
    }

    /// Encrypt `message` to `owner_id` and return the encoded envelope.
    ///
    /// With strict verification the recipient's key must be covered by a
    /// live certificate.
    pub fn encrypt_for(&self, owner_id: &str, message: &[u8]) -> CryptoResult<String> {
        utils::validate_owner_id(owner_id)?;
        let public_key_pem = self.trusted_public_key(owner_id)?;

        let envelope = envelope::seal(&self.engine, &public_key_pem, message, self.clock.now())?;
        let encoded = envelope.encode()?;
        if encoded.len() > self.config.max_envelope_bytes {
            return Err(CryptoError::invalid_input(
                "message",
                &format!("envelope would exceed {} bytes", self.config.max_envelope_bytes),
                error_codes::PAYLOAD_TOO_LARGE,
            ));
        }
        Ok(encoded)
    }

    /// Decrypt an envelope sent to the server by `claimed_owner_id`.
    ///
    /// Oversized or malformed envelopes are rejected as `InvalidInput`
    /// before any cryptography. Every later failure (replay window,
    /// untrusted sender, wrong key, bad tag) is logged with its cause and
    /// returned as the generic `ChannelFailure`.
    pub fn decrypt_from(&self, encoded: &str, claimed_owner_id: &str) -> CryptoResult<Vec<u8>> {
        let envelope = Envelope::decode(encoded, self.config.max_envelope_bytes)?;

        match self.open_checked(&envelope, claimed_owner_id) {
            Ok(message) => Ok(message),
            Err(e) => {
                log::warn!(
                    "rejected message {} from {}: [{}] {}",
                    envelope.session_id,
                    claimed_owner_id,
                    e.error_type(),
                    e
                );
                self.audit.record(
                    AuditEvent::new(AuditAction::MessageRejected, claimed_owner_id, &envelope.session_id, self.clock.now())
                        .with_detail("error_type", e.error_type())
                        .with_detail("error_code", e.error_code()),
                );
                Err(CryptoError::ChannelFailure)
            }
        }
    }

    fn open_checked(&self, envelope: &Envelope, claimed_owner_id: &str) -> CryptoResult<Vec<u8>> {
        utils::validate_owner_id(claimed_owner_id)?;

        // Replay window, before any decryption
        let now = self.clock.now();
        let sent_at = envelope
            .sent_at()
            .ok_or_else(|| CryptoError::invalid_input("timestamp", "out of range", error_codes::MALFORMED_ENVELOPE))?;
        if now - sent_at > self.config.replay_window() {
            return Err(CryptoError::unauthorized(
                "decrypt_from",
                &format!("envelope from {} is outside the replay window", sent_at),
                error_codes::REPLAY_REJECTED,
            ));
        }
        if sent_at - now > self.config.max_clock_skew() {
            return Err(CryptoError::unauthorized(
                "decrypt_from",
                &format!("envelope timestamp {} is in the future", sent_at),
                error_codes::REPLAY_REJECTED,
            ));
        }

        if self.config.strict_verification {
            self.trusted_public_key(claimed_owner_id)?;
        }

        let server_key = self.server_public_key()?;
        let server_key_id = certificates::key_id(&certificates::public_key_hash(&server_key));
        if !utils::constant_time_eq(envelope.key_id.as_bytes(), server_key_id.as_bytes()) {
            return Err(CryptoError::integrity_failure(
                "decrypt_from",
                &format!("envelope wrapped to unknown key {}", envelope.key_id),
                error_codes::AEAD_TAG_MISMATCH,
            ));
        }

        envelope::open(&self.engine, &self.config.server_identity, envelope)
    }

    /// Public key of `owner_id`, checked against the certificate registry
    /// when strict verification is on.
    fn trusted_public_key(&self, owner_id: &str) -> CryptoResult<String> {
        let public_key_pem = self
            .engine
            .key_store()
            .public_key(owner_id)?
            .ok_or_else(|| CryptoError::not_found("key pair", owner_id, error_codes::KEY_NOT_FOUND))?;

        if self.config.strict_verification {
            let verification = self
                .registry
                .verify_by_owner_and_key_hash(owner_id, &certificates::public_key_hash(&public_key_pem))?;
            if !verification.valid {
                return Err(CryptoError::unauthorized(
                    "certificate_check",
                    &format!("no live certificate for {}'s key: {:?}", owner_id, verification.failure),
                    error_codes::CERTIFICATE_UNTRUSTED,
                ));
            }
        }
        Ok(public_key_pem)
    }

    /// Session key for `owner_id`, wrapped to their current public key.
    ///
    /// A cached, unexpired key is reused; otherwise a new one is minted
    /// with `session_key_expiry_minutes` of lifetime.
    pub fn create_session(&self, owner_id: &str) -> CryptoResult<SessionInfo> {
        utils::validate_owner_id(owner_id)?;
        let public_key_pem = self.trusted_public_key(owner_id)?;
        let now = self.clock.now();

        let (entry, reused) = match self.sessions.get_valid(owner_id, now) {
            Some(entry) => (entry, true),
            None => {
                let entry = SessionEntry {
                    session_id: Uuid::new_v4().to_string(),
                    key: SecureBytes::from(utils::random_bytes(DOCUMENT_KEY_LEN)?),
                    iv: utils::random_bytes(IV_LEN)?,
                    expires_at: clock::checked_add(now, self.config.session_lifetime())?,
                };
                (self.sessions.insert(owner_id, entry), false)
            }
        };

        let wrapped = self.engine.wrap_key(&public_key_pem, &entry.key)?;
        Ok(SessionInfo {
            session_id: entry.session_id.clone(),
            owner_id: owner_id.to_string(),
            encrypted_session_key: base64::encode(wrapped),
            iv: base64::encode(&entry.iv),
            key_id: certificates::key_id(&certificates::public_key_hash(&public_key_pem)),
            expires_at: entry.expires_at,
            reused,
        })
    }

    /// Mint a single-use challenge for `owner_id`, signed with the server
    /// key.
    pub fn issue_challenge(&self, owner_id: &str) -> CryptoResult<Challenge> {
        utils::validate_owner_id(owner_id)?;
        let now = self.clock.now();

        let mut challenge = Challenge {
            challenge: base64::encode(utils::random_bytes(CHALLENGE_LEN)?),
            signature: String::new(),
            timestamp: now,
            expires_at: clock::checked_add(now, self.config.challenge_ttl())?,
        };
        challenge.signature = self
            .engine
            .sign(&self.config.server_identity, &challenge.signed_payload(owner_id))?;

        self.challenges
            .insert(&challenge.challenge, owner_id, challenge.expires_at);
        Ok(challenge)
    }

    /// Check `owner_id`'s base64 signature over the characters of
    /// `challenge`. The challenge is consumed whatever the outcome.
    pub fn verify_challenge_response(&self, owner_id: &str, challenge: &str, response: &str) -> CryptoResult<bool> {
        utils::validate_owner_id(owner_id)?;
        let now = self.clock.now();

        if let Err(reason) = self.challenges.take(challenge, owner_id, now) {
            log::warn!("challenge response from {} rejected: {}", owner_id, reason);
            return Ok(false);
        }

        let public_key_pem = match self.trusted_public_key(owner_id) {
            Ok(pem) => pem,
            Err(e @ CryptoError::Unauthorized { .. }) | Err(e @ CryptoError::NotFound { .. }) => {
                log::warn!("challenge response from {} rejected: {}", owner_id, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let verified = match self
            .engine
            .verify_with_public_key(&public_key_pem, challenge.as_bytes(), response)
        {
            Ok(verified) => verified,
            Err(CryptoError::InvalidInput { .. }) => false,
            Err(e) => return Err(e),
        };

        if verified {
            self.audit.record(AuditEvent::new(AuditAction::ChallengeVerified, owner_id, owner_id, now));
        } else {
            log::warn!("challenge response from {} has a bad signature", owner_id);
        }
        Ok(verified)
    }

    /// Session plus challenge in one round trip.
    pub fn handshake(&self, owner_id: &str) -> CryptoResult<Handshake> {
        let session = self.create_session(owner_id)?;
        let challenge = self.issue_challenge(owner_id)?;
        Ok(Handshake {
            server_public_key: self.server_public_key()?,
            session,
            challenge,
        })
    }

    /// Evict expired session keys and challenges.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let report = SweepReport {
            sessions: self.sessions.sweep(now),
            challenges: self.challenges.sweep(now),
        };
        if report.sessions > 0 || report.challenges > 0 {
            log::debug!(
                "evicted {} session keys and {} challenges",
                report.sessions,
                report.challenges
            );
        }
        report
    }

    pub fn cached_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending_challenges(&self) -> usize {
        self.challenges.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> CryptoResult<PeriodicTask> {
        let channel = Arc::downgrade(self);
        PeriodicTask::spawn(
            "session-sweep",
            std::time::Duration::from_secs(self.config.sweep_interval_secs),
            move || {
                if let Some(channel) = channel.upgrade() {
                    channel.sweep();
                }
            },
        )
    }
}
