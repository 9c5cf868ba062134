/*!
 * Upward-facing operations
 *
 * `DocSealService` wires every component from a `CoreConfig` and exposes the
 * operations the HTTP layer calls. Callers arrive already authenticated as a
 * `Principal`; ownership and admin checks happen here, before anything is
 * issued or revoked.
 *
 * Message operations cross the network boundary. Their cryptographic
 * failures collapse to `CryptoError::ChannelFailure`; render errors for
 * clients with `CryptoError::public_message`.
 */

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditSink, AuditTrail};
use crate::certificates::{
    Certificate, CertificateRegistry, CertificateStats, CertificateVerification, CrlSnapshot, IssueOptions,
    RevocationReason,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::crypto_engine::CryptoEngine;
use crate::directory::{User, UserDirectory};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::key_store::{KeyStore, StoredKeyInfo};
use crate::rotation::{KeyRotationScheduler, RotationReason, RotationStats};
use crate::secure_channel::{Handshake, SecureChannel};
use crate::tasks::PeriodicTask;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub is_admin: bool,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Principal {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            is_admin: false,
            ip: None,
            user_agent: None,
        }
    }

    pub fn admin(user_id: &str) -> Self {
        Self {
            is_admin: true,
            ..Self::new(user_id)
        }
    }

    fn may_act_for(&self, owner_id: &str) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            is_admin: user.is_admin,
            ip: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IssueCertificateRequest {
    /// Defaults to the caller. Issuing for someone else needs admin.
    pub owner_id: Option<String>,
    pub validity_days: Option<u32>,
    #[serde(flatten)]
    pub options: IssueOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeCertificateRequest {
    pub certificate_id: String,
    pub reason: RevocationReason,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub sender_id: String,
    pub message: Vec<u8>,
}

/// Handles of the background timers. Dropping it stops them.
pub struct BackgroundTasks {
    tasks: Vec<PeriodicTask>,
}

impl BackgroundTasks {
    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(PeriodicTask::name).collect()
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.stop();
        }
    }
}

pub struct DocSealService {
    config: CoreConfig,
    directory: Arc<dyn UserDirectory>,
    engine: Arc<CryptoEngine>,
    registry: Arc<CertificateRegistry>,
    scheduler: Arc<KeyRotationScheduler>,
    channel: Arc<SecureChannel>,
}

impl DocSealService {
    pub fn open(config: CoreConfig, directory: Arc<dyn UserDirectory>, audit_sink: Arc<dyn AuditSink>) -> CryptoResult<Self> {
        Self::with_clock(config, directory, audit_sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CoreConfig,
        directory: Arc<dyn UserDirectory>,
        audit_sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> CryptoResult<Self> {
        config.validate()?;
        let audit = AuditTrail::new(audit_sink);

        let key_store = Arc::new(KeyStore::open(&config.key_store, clock.clone())?);
        let engine = Arc::new(CryptoEngine::new(config.crypto.clone(), key_store, clock)?);
        let registry = Arc::new(CertificateRegistry::with_memory_store(
            config.certificates.clone(),
            engine.clone(),
            audit.clone(),
        )?);
        let scheduler = KeyRotationScheduler::new(config.rotation.clone(), engine.clone(), registry.clone(), audit.clone());
        let channel = Arc::new(SecureChannel::new(config.channel.clone(), engine.clone(), registry.clone(), audit)?);

        log::info!(
            "docseal core ready: keys in {}, strict verification {}",
            config.key_store.directory.display(),
            config.channel.strict_verification
        );
        Ok(Self {
            config,
            directory,
            engine,
            registry,
            scheduler,
            channel,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<CryptoEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<CertificateRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<KeyRotationScheduler> {
        &self.scheduler
    }

    pub fn channel(&self) -> &Arc<SecureChannel> {
        &self.channel
    }

    pub fn issue_certificate(&self, principal: &Principal, request: IssueCertificateRequest) -> CryptoResult<Certificate> {
        let owner_id = request.owner_id.as_deref().unwrap_or(&principal.user_id);
        authorize(principal, owner_id, "issue_certificate")?;
        self.require_user(owner_id)?;

        self.registry
            .issue(owner_id, request.validity_days, request.options, &principal.user_id)
    }

    pub fn revoke_certificate(&self, principal: &Principal, request: &RevokeCertificateRequest) -> CryptoResult<Certificate> {
        let certificate = self.registry.get(&request.certificate_id)?;
        authorize(principal, &certificate.owner_id, "revoke_certificate")?;

        self.registry.revoke(
            &request.certificate_id,
            request.reason,
            request.details.as_deref(),
            &principal.user_id,
        )
    }

    pub fn verify_certificate(&self, certificate_id: &str) -> CryptoResult<CertificateVerification> {
        self.registry.verify(certificate_id)
    }

    pub fn list_my_certificates(&self, principal: &Principal) -> CryptoResult<Vec<Certificate>> {
        self.registry.list_for_owner(&principal.user_id)
    }

    pub fn list_certificates_for_user(&self, principal: &Principal, user_id: &str) -> CryptoResult<Vec<Certificate>> {
        authorize(principal, user_id, "list_certificates_for_user")?;
        self.require_user(user_id)?;
        self.registry.list_for_owner(user_id)
    }

    pub fn crl(&self) -> CryptoResult<Arc<CrlSnapshot>> {
        self.registry.crl()
    }

    pub fn certificate_stats(&self, principal: &Principal) -> CryptoResult<CertificateStats> {
        require_admin(principal, "certificate_stats")?;
        self.registry.stats()
    }

    pub fn rotation_stats(&self, principal: &Principal) -> CryptoResult<RotationStats> {
        require_admin(principal, "rotation_stats")?;
        self.scheduler.stats()
    }

    pub fn cleanup_expired(&self, principal: &Principal) -> CryptoResult<usize> {
        require_admin(principal, "cleanup_expired")?;
        self.registry.cleanup_expired()
    }

    pub fn server_public_key(&self) -> CryptoResult<String> {
        self.channel.server_public_key()
    }

    /// Session key and challenge for the caller, provisioning a key pair on
    /// first contact.
    pub fn initiate_session(&self, principal: &Principal) -> CryptoResult<Handshake> {
        self.engine.ensure_key_pair(&principal.user_id)?;
        self.channel.handshake(&principal.user_id).map_err(at_boundary)
    }

    pub fn receive_message(&self, principal: &Principal, envelope: &str) -> CryptoResult<ReceivedMessage> {
        let message = self.channel.decrypt_from(envelope, &principal.user_id)?;
        Ok(ReceivedMessage {
            sender_id: principal.user_id.clone(),
            message,
        })
    }

    /// Encrypted envelope for `recipient_id`, ready for delivery.
    pub fn send_message_to_user(&self, principal: &Principal, recipient_id: &str, message: &[u8]) -> CryptoResult<String> {
        self.require_user(recipient_id)?;
        log::debug!("{} sends a message to {}", principal.user_id, recipient_id);
        self.channel.encrypt_for(recipient_id, message).map_err(at_boundary)
    }

    pub fn verify_challenge(&self, principal: &Principal, challenge: &str, response: &str) -> CryptoResult<bool> {
        self.channel
            .verify_challenge_response(&principal.user_id, challenge, response)
            .map_err(at_boundary)
    }

    pub fn rotate_my_key(&self, principal: &Principal) -> CryptoResult<StoredKeyInfo> {
        self.scheduler
            .rotate_now(&principal.user_id, RotationReason::Manual, &principal.user_id)
    }

    /// CRL refresh, session sweep and, when enabled, the rotation schedule.
    pub fn start_background_tasks(&self) -> CryptoResult<BackgroundTasks> {
        let mut tasks = vec![self.registry.spawn_crl_refresher()?, self.channel.spawn_sweeper()?];
        if self.config.rotation.enabled {
            tasks.push(self.scheduler.spawn()?);
        }
        Ok(BackgroundTasks { tasks })
    }

    fn require_user(&self, user_id: &str) -> CryptoResult<User> {
        self.directory
            .find_user(user_id)
            .ok_or_else(|| CryptoError::not_found("user", user_id, error_codes::USER_NOT_FOUND))
    }
}

fn authorize(principal: &Principal, owner_id: &str, operation: &str) -> CryptoResult<()> {
    if principal.may_act_for(owner_id) {
        return Ok(());
    }
    log::warn!("{} denied {} on behalf of {}", principal.user_id, operation, owner_id);
    Err(CryptoError::unauthorized(
        operation,
        &format!("{} may not act for {}", principal.user_id, owner_id),
        error_codes::ACCESS_DENIED,
    ))
}

fn require_admin(principal: &Principal, operation: &str) -> CryptoResult<()> {
    if principal.is_admin {
        return Ok(());
    }
    Err(CryptoError::unauthorized(
        operation,
        &format!("{} is not an administrator", principal.user_id),
        error_codes::ACCESS_DENIED,
    ))
}

/// Collapse cryptographic failures before they leave the process.
fn at_boundary(error: CryptoError) -> CryptoError {
    if error.is_cryptographic() {
        log::warn!("secure channel failure: [{}] {}", error.error_type(), error);
        CryptoError::ChannelFailure
    } else {
        error
    }
}
