use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::certificate::{
    self, Certificate, CertificateMetadata, CertificateStatus, CertificateVerification, IssueOptions, Revocation,
    RevocationReason,
};
use super::crl::{CrlCache, CrlSnapshot};
use super::store::{CertificateStore, MemoryCertificateStore};
use crate::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::clock::{self, Clock};
use crate::config::CertificateConfig;
use crate::crypto_engine::CryptoEngine;
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::rotation::{RotationReason, RotationTrigger};
use crate::tasks::PeriodicTask;
use crate::utils;

const KEY_ALGORITHM: &str = "RSA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub expired: usize,
    pub revoked: usize,
    pub crl_entries: usize,
    pub crl_refreshed_at: DateTime<Utc>,
}

pub struct CertificateRegistry {
    config: CertificateConfig,
    engine: Arc<CryptoEngine>,
    store: Arc<dyn CertificateStore>,
    crl: CrlCache,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    rotation: RwLock<Option<Weak<dyn RotationTrigger>>>,
}

impl CertificateRegistry {
    pub fn new(
        config: CertificateConfig,
        engine: Arc<CryptoEngine>,
        store: Arc<dyn CertificateStore>,
        audit: AuditTrail,
    ) -> CryptoResult<Self> {
        let clock = engine.clock().clone();
        let initial = CrlSnapshot::build(&store.list_all()?, clock.now());

        Ok(Self {
            config,
            engine,
            store,
            crl: CrlCache::new(initial),
            audit,
            clock,
            rotation: RwLock::new(None),
        })
    }

    pub fn with_memory_store(config: CertificateConfig, engine: Arc<CryptoEngine>, audit: AuditTrail) -> CryptoResult<Self> {
        Self::new(config, engine, Arc::new(MemoryCertificateStore::new()), audit)
    }

    /// Register the component that rotates keys after compromise. Held
    /// weakly; the scheduler owns a strong reference to this registry.
    pub fn attach_rotation_trigger(&self, trigger: Weak<dyn RotationTrigger>) {
        *self.rotation.write().unwrap_or_else(|e| e.into_inner()) = Some(trigger);
    }

    /// Issue a certificate for `owner_id`'s current key, generating a key
    /// pair first when the owner has none.
    pub fn issue(
        &self,
        owner_id: &str,
        validity_days: Option<u32>,
        options: IssueOptions,
        actor_id: &str,
    ) -> CryptoResult<Certificate> {
        self.issue_with_lineage(owner_id, validity_days, options, actor_id, None)
    }

    fn issue_with_lineage(
        &self,
        owner_id: &str,
        validity_days: Option<u32>,
        options: IssueOptions,
        actor_id: &str,
        parent: Option<&Certificate>,
    ) -> CryptoResult<Certificate> {
        utils::validate_owner_id(owner_id)?;
        let validity_days = validity_days.unwrap_or(self.config.default_validity_days);
        if validity_days == 0 || validity_days > self.config.max_validity_days {
            return Err(CryptoError::invalid_input(
                "validity_days",
                &format!("must be between 1 and {}", self.config.max_validity_days),
                error_codes::INVALID_PARAMETER,
            ));
        }

        let (public_key_pem, generated) = self.engine.ensure_key_pair(owner_id)?;
        if generated {
            self.audit.record(AuditEvent::new(
                AuditAction::KeyPairGenerated,
                actor_id,
                owner_id,
                self.clock.now(),
            ));
        }

        let issued_at = self.clock.now();
        let valid_from = match options.not_before {
            Some(not_before) if not_before > issued_at => not_before,
            _ => issued_at,
        };
        let valid_until = clock::checked_add(valid_from, Duration::days(i64::from(validity_days)))?;
        let status = if valid_from > issued_at {
            CertificateStatus::Pending
        } else {
            CertificateStatus::Active
        };
        let public_key_hash = certificate::public_key_hash(&public_key_pem);

        let certificate = Certificate {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            key_id: certificate::key_id(&public_key_hash),
            public_key_hash,
            valid_from,
            valid_until,
            status,
            fingerprint: certificate::fingerprint(&public_key_pem, owner_id, issued_at),
            capabilities: options.capabilities.unwrap_or_default(),
            security_level: options.security_level.unwrap_or_default(),
            rotation_generation: parent.map(|p| p.rotation_generation + 1).unwrap_or(0),
            revocation: None,
            metadata: CertificateMetadata::V1 {
                key_algorithm: KEY_ALGORITHM.to_string(),
                issued_by: actor_id.to_string(),
                purpose: options.purpose,
            },
            parent_certificate_id: parent.map(|p| p.id.clone()),
            issued_at,
        };
        self.store.insert(certificate.clone())?;

        log::info!(
            "issued certificate {} for {} ({} days, {})",
            certificate.id,
            owner_id,
            validity_days,
            certificate.status.as_str()
        );
        self.audit.record(
            AuditEvent::new(AuditAction::CertificateIssued, actor_id, &certificate.id, issued_at)
                .with_detail("owner_id", owner_id)
                .with_detail("validity_days", validity_days)
                .with_detail("key_id", &certificate.key_id),
        );
        Ok(certificate)
    }

    /// Revoke a certificate.
    ///
    /// Revoking twice is a `Conflict`; revoking an expired certificate is
    /// `InvalidState`. The CRL reflects the revocation before this returns.
    pub fn revoke(
        &self,
        certificate_id: &str,
        reason: RevocationReason,
        details: Option<&str>,
        revoked_by: &str,
    ) -> CryptoResult<Certificate> {
        let now = self.clock.now();
        let revoked = self.store.update(certificate_id, &mut |certificate| {
            certificate.refresh_status(now);
            match certificate.status {
                CertificateStatus::Revoked => Err(CryptoError::conflict(
                    "certificate",
                    &format!("{} is already revoked", certificate.id),
                    error_codes::ALREADY_REVOKED,
                )),
                CertificateStatus::Expired => Err(CryptoError::invalid_state(
                    "certificate",
                    "expired",
                    "expired certificates cannot be revoked",
                )),
                CertificateStatus::Pending | CertificateStatus::Active => {
                    certificate.status = CertificateStatus::Revoked;
                    certificate.revocation = Some(Revocation {
                        revoked_at: now,
                        reason,
                        details: details.map(str::to_string),
                        revoked_by: revoked_by.to_string(),
                    });
                    Ok(())
                }
            }
        })?;

        self.refresh_crl()?;

        log::info!(
            "revoked certificate {} of {} ({})",
            revoked.id,
            revoked.owner_id,
            reason.as_str()
        );
        let mut event = AuditEvent::new(AuditAction::CertificateRevoked, revoked_by, &revoked.id, now)
            .with_detail("owner_id", &revoked.owner_id)
            .with_detail("reason", reason.as_str());
        if let Some(details) = details {
            event = event.with_detail("details", details);
        }
        self.audit.record(event);

        if reason.requires_rotation() {
            self.escalate(&revoked.owner_id, reason, revoked_by);
        }
        Ok(revoked)
    }

    fn escalate(&self, owner_id: &str, reason: RevocationReason, actor_id: &str) {
        let trigger = self
            .rotation
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(trigger) = trigger else {
            log::warn!(
                "{} revocation for {} but no rotation scheduler is attached",
                reason.as_str(),
                owner_id
            );
            return;
        };

        if reason.raises_breach() {
            trigger.signal_breach(&format!("security incident reported against {}", owner_id), actor_id);
        }
        let rotation_reason = match reason {
            RevocationReason::SecurityIncident => RotationReason::SecurityIncident,
            _ => RotationReason::KeyCompromise,
        };
        trigger.request_rotation(owner_id, rotation_reason, actor_id);
    }

    /// Check a certificate, persisting any time-based transition first.
    pub fn verify(&self, certificate_id: &str) -> CryptoResult<CertificateVerification> {
        match self.refreshed(certificate_id)? {
            Some(certificate) => Ok(CertificateVerification::of(&certificate)),
            None => Ok(CertificateVerification::not_found()),
        }
    }

    /// Whether `owner_id` holds a live certificate for the key hashing to
    /// `public_key_hash`. This gates every use of a counterparty key.
    pub fn verify_by_owner_and_key_hash(&self, owner_id: &str, public_key_hash: &str) -> CryptoResult<CertificateVerification> {
        let mut candidates: Vec<Certificate> = Vec::new();
        for certificate in self.store.list_for_owner(owner_id)? {
            if !utils::constant_time_eq(certificate.public_key_hash.as_bytes(), public_key_hash.as_bytes()) {
                continue;
            }
            if let Some(refreshed) = self.refreshed(&certificate.id)? {
                candidates.push(refreshed);
            }
        }

        if let Some(active) = candidates
            .iter()
            .filter(|c| c.status == CertificateStatus::Active)
            .max_by_key(|c| c.valid_until)
        {
            return Ok(CertificateVerification::of(active));
        }

        // Report on the most recently issued one
        Ok(candidates
            .iter()
            .max_by_key(|c| c.issued_at)
            .map(CertificateVerification::of)
            .unwrap_or_else(CertificateVerification::not_found))
    }

    /// Current CRL, refreshed first when older than the refresh interval.
    pub fn crl(&self) -> CryptoResult<Arc<CrlSnapshot>> {
        let snapshot = self.crl.snapshot();
        let max_age = Duration::from_std(self.config.crl_refresh_interval()).unwrap_or_else(|_| Duration::zero());
        if self.clock.now() - snapshot.refreshed_at >= max_age {
            return self.refresh_crl();
        }
        Ok(snapshot)
    }

    pub fn refresh_crl(&self) -> CryptoResult<Arc<CrlSnapshot>> {
        self.crl.refresh(|| {
            let certificates = self.store.list_all()?;
            Ok(CrlSnapshot::build(&certificates, self.clock.now()))
        })
    }

    /// Move every certificate past `valid_until` to `Expired`. Returns the
    /// number moved by this call.
    pub fn cleanup_expired(&self) -> CryptoResult<usize> {
        let now = self.clock.now();
        let mut expired = 0;

        for certificate in self.store.list_all()? {
            if certificate.status.is_terminal() || certificate.effective_status(now) != CertificateStatus::Expired {
                continue;
            }
            let mut changed = false;
            let result = self.store.update(&certificate.id, &mut |c| {
                changed = c.refresh_status(now) && c.status == CertificateStatus::Expired;
                Ok(())
            });
            match result {
                Ok(_) if changed => expired += 1,
                Ok(_) => {}
                Err(e) => log::warn!("failed to expire certificate {}: {}", certificate.id, e),
            }
        }

        if expired > 0 {
            log::info!("expired {} certificates", expired);
            self.audit.record(
                AuditEvent::new(AuditAction::CertificatesExpired, "system", "certificates", now)
                    .with_detail("count", expired),
            );
        }
        Ok(expired)
    }

    pub fn get(&self, certificate_id: &str) -> CryptoResult<Certificate> {
        self.refreshed(certificate_id)?
            .ok_or_else(|| CryptoError::not_found("certificate", certificate_id, error_codes::CERTIFICATE_NOT_FOUND))
    }

    /// Owner's certificates, newest first.
    pub fn list_for_owner(&self, owner_id: &str) -> CryptoResult<Vec<Certificate>> {
        utils::validate_owner_id(owner_id)?;
        let now = self.clock.now();
        let mut certificates = self.store.list_for_owner(owner_id)?;
        for certificate in certificates.iter_mut() {
            if certificate.effective_status(now) != certificate.status {
                if let Some(refreshed) = self.refreshed(&certificate.id)? {
                    *certificate = refreshed;
                }
            }
        }
        certificates.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(certificates)
    }

    pub fn stats(&self) -> CryptoResult<CertificateStats> {
        let now = self.clock.now();
        let crl = self.crl()?;
        let mut stats = CertificateStats {
            total: 0,
            pending: 0,
            active: 0,
            expired: 0,
            revoked: 0,
            crl_entries: crl.len(),
            crl_refreshed_at: crl.refreshed_at,
        };
        for certificate in self.store.list_all()? {
            stats.total += 1;
            match certificate.effective_status(now) {
                CertificateStatus::Pending => stats.pending += 1,
                CertificateStatus::Active => stats.active += 1,
                CertificateStatus::Expired => stats.expired += 1,
                CertificateStatus::Revoked => stats.revoked += 1,
            }
        }
        Ok(stats)
    }

    /// Chain certificates onto a rotated key.
    ///
    /// Live certificates of `owner_id` bound to `previous_key_hash` are
    /// revoked as `Superseded` and one successor is issued for the owner's
    /// current key, with the latest superseded certificate as its parent.
    pub fn supersede_after_rotation(
        &self,
        owner_id: &str,
        previous_key_hash: &str,
        actor_id: &str,
    ) -> CryptoResult<Option<Certificate>> {
        let now = self.clock.now();
        let mut live: Vec<Certificate> = self
            .store
            .list_for_owner(owner_id)?
            .into_iter()
            .filter(|c| c.public_key_hash == previous_key_hash)
            .filter(|c| matches!(c.effective_status(now), CertificateStatus::Active | CertificateStatus::Pending))
            .collect();
        if live.is_empty() {
            return Ok(None);
        }
        live.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));

        let mut superseded = Vec::new();
        for certificate in &live {
            match self.revoke(
                &certificate.id,
                RevocationReason::Superseded,
                Some("key rotated"),
                actor_id,
            ) {
                Ok(revoked) => superseded.push(revoked),
                // Lost a race with another revocation or expiry
                Err(CryptoError::Conflict { .. }) | Err(CryptoError::InvalidState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        let Some(parent) = superseded.last() else {
            return Ok(None);
        };

        let validity_days = (parent.valid_until - parent.valid_from)
            .num_days()
            .clamp(1, i64::from(self.config.max_validity_days));
        let options = IssueOptions {
            not_before: None,
            capabilities: Some(parent.capabilities),
            security_level: Some(parent.security_level),
            purpose: match &parent.metadata {
                CertificateMetadata::V1 { purpose, .. } => purpose.clone(),
            },
        };
        let successor =
            self.issue_with_lineage(owner_id, Some(validity_days as u32), options, actor_id, Some(parent))?;

        self.audit.record(
            AuditEvent::new(AuditAction::CertificateSuperseded, actor_id, &parent.id, now)
                .with_detail("successor_id", &successor.id)
                .with_detail("superseded_count", superseded.len()),
        );
        Ok(Some(successor))
    }

    /// Refresh the CRL every `crl_refresh_interval` in the background.
    pub fn spawn_crl_refresher(self: &Arc<Self>) -> CryptoResult<PeriodicTask> {
        let registry = Arc::downgrade(self);
        PeriodicTask::spawn("crl-refresh", self.config.crl_refresh_interval(), move || {
            if let Some(registry) = registry.upgrade() {
                if let Err(e) = registry.refresh_crl() {
                    log::warn!("CRL refresh failed: {}", e);
                }
            }
        })
    }

    fn refreshed(&self, certificate_id: &str) -> CryptoResult<Option<Certificate>> {
        let now = self.clock.now();
        let Some(certificate) = self.store.get(certificate_id)? else {
            return Ok(None);
        };
        if certificate.effective_status(now) == certificate.status {
            return Ok(Some(certificate));
        }
        self.store
            .update(certificate_id, &mut |c| {
                c.refresh_status(now);
                Ok(())
            })
            .map(Some)
    }
}
