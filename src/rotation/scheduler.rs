use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use super::breach::{BreachSignal, BreachState};
use super::{RotationReason, RotationTrigger};
use crate::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::certificates::{self, CertificateRegistry};
use crate::clock::{self, Clock};
use crate::config::RotationConfig;
use crate::crypto_engine::CryptoEngine;
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::key_store::StoredKeyInfo;
use crate::tasks::PeriodicTask;
use crate::utils;

const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPassReport {
    /// Rotation was disabled by configuration; nothing was selected.
    pub skipped: bool,
    pub breach_mode: bool,
    pub breach_cleared: bool,
    pub rotated: Vec<String>,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationStats {
    pub total_keys: usize,
    /// Keys older than the rotation threshold.
    pub overdue: usize,
    pub average_key_age_days: f64,
    pub breach_active: bool,
    pub breach: Option<BreachState>,
    pub pending_urgent: usize,
    pub rotation_frequency_days: u32,
}

pub struct KeyRotationScheduler {
    config: RotationConfig,
    engine: Arc<CryptoEngine>,
    registry: Arc<CertificateRegistry>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    breach: BreachSignal,
    /// Owners rotated on the next pass regardless of age.
    urgent: Mutex<BTreeSet<String>>,
    in_flight: Mutex<HashSet<String>>,
}

/// Removes an owner from the in-flight set when a rotation ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    owner_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.owner_id);
    }
}

impl KeyRotationScheduler {
    /// Build the scheduler and attach it to `registry` as its rotation
    /// trigger.
    pub fn new(
        config: RotationConfig,
        engine: Arc<CryptoEngine>,
        registry: Arc<CertificateRegistry>,
        audit: AuditTrail,
    ) -> Arc<Self> {
        let clock = engine.clock().clone();
        let scheduler = Arc::new(Self {
            config,
            engine,
            registry,
            audit,
            clock,
            breach: BreachSignal::new(),
            urgent: Mutex::new(BTreeSet::new()),
            in_flight: Mutex::new(HashSet::new()),
        });

        let trigger: Weak<dyn RotationTrigger> = Arc::downgrade(&scheduler) as Weak<dyn RotationTrigger>;
        scheduler.registry.attach_rotation_trigger(trigger);
        scheduler
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// One scheduled pass over at most `batch_size` principals.
    ///
    /// Urgent owners go first. With an active breach the remaining capacity
    /// drains keys created before the breach, and the signal clears once none
    /// remain; otherwise keys older than the rotation frequency are taken,
    /// oldest first. A failure for one owner is counted and the pass goes on.
    pub fn run_scheduled_pass(&self) -> CryptoResult<RotationPassReport> {
        let mut report = RotationPassReport::default();
        if !self.config.enabled {
            log::debug!("key rotation disabled; skipping scheduled pass");
            report.skipped = true;
            return Ok(report);
        }

        let now = self.clock.now();
        let batch_size = self.config.batch_size;
        let mut selected: Vec<(String, RotationReason)> = Vec::new();

        {
            let mut urgent = self.urgent.lock().unwrap_or_else(|e| e.into_inner());
            while selected.len() < batch_size {
                let Some(owner_id) = urgent.pop_first() else {
                    break;
                };
                selected.push((owner_id, RotationReason::Urgent));
            }
        }

        let keys = self.engine.key_store().list()?;
        let breach = self.active_breach();
        report.breach_mode = breach.is_some();

        let mut candidates: Vec<&StoredKeyInfo> = match &breach {
            Some(state) => keys.iter().filter(|k| k.created_at < state.raised_at).collect(),
            None => {
                let threshold = clock::checked_sub(now, self.config.rotation_age())?;
                keys.iter().filter(|k| k.created_at < threshold).collect()
            }
        };
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let reason = if breach.is_some() {
            RotationReason::Breach
        } else {
            RotationReason::Scheduled
        };
        for key in candidates {
            if selected.len() >= batch_size {
                break;
            }
            if selected.iter().any(|(owner_id, _)| *owner_id == key.owner_id) {
                continue;
            }
            selected.push((key.owner_id.clone(), reason));
        }

        for (owner_id, reason) in selected {
            match self.rotate_now(&owner_id, reason, SYSTEM_ACTOR) {
                Ok(_) => report.rotated.push(owner_id),
                Err(e) => {
                    report.failures += 1;
                    if reason == RotationReason::Urgent && !matches!(e, CryptoError::NotFound { .. }) {
                        self.queue_urgent(&owner_id);
                    }
                    log::warn!("scheduled rotation of {} failed: {}", owner_id, e);
                }
            }
        }

        if let Some(state) = breach {
            let remaining = self
                .engine
                .key_store()
                .list()?
                .iter()
                .filter(|k| k.created_at < state.raised_at)
                .count();
            if remaining == 0 {
                self.clear_breach(SYSTEM_ACTOR);
                report.breach_cleared = true;
            }
        }

        log::info!(
            "rotation pass: {} rotated, {} failed{}",
            report.rotated.len(),
            report.failures,
            if report.breach_mode { " (breach mode)" } else { "" }
        );
        Ok(report)
    }

    /// Rotate `owner_id`'s key pair immediately.
    ///
    /// Generates a new pair, swaps it in atomically, records the rotation and
    /// chains the owner's live certificates onto the new key. A concurrent
    /// rotation of the same owner is a `Conflict`.
    pub fn rotate_now(&self, owner_id: &str, reason: RotationReason, actor_id: &str) -> CryptoResult<StoredKeyInfo> {
        utils::validate_owner_id(owner_id)?;
        let _guard = self.begin(owner_id)?;

        let result = self.rotate_key(owner_id, reason, actor_id);
        if let Err(e) = &result {
            self.audit.record(
                AuditEvent::new(AuditAction::KeyRotationFailed, actor_id, owner_id, self.clock.now())
                    .with_detail("reason", reason.as_str())
                    .with_detail("error", e.error_type()),
            );
        }
        result
    }

    fn rotate_key(&self, owner_id: &str, reason: RotationReason, actor_id: &str) -> CryptoResult<StoredKeyInfo> {
        let key_store = self.engine.key_store();
        let previous_key = key_store
            .public_key(owner_id)?
            .ok_or_else(|| CryptoError::not_found("key pair", owner_id, error_codes::KEY_NOT_FOUND))?;

        let key_pair = self.engine.generate_key_pair(owner_id)?;
        let info = key_store.rotate(owner_id, &key_pair.public_key_pem, &key_pair.private_key)?;

        log::info!(
            "rotated key pair of {} to generation {} ({})",
            owner_id,
            info.generation,
            reason.as_str()
        );
        self.audit.record(
            AuditEvent::new(AuditAction::KeyRotated, actor_id, owner_id, self.clock.now())
                .with_detail("reason", reason.as_str())
                .with_detail("generation", info.generation),
        );

        let previous_hash = certificates::public_key_hash(&previous_key);
        if let Err(e) = self.registry.supersede_after_rotation(owner_id, &previous_hash, actor_id) {
            log::warn!("rotated {} but could not supersede its certificates: {}", owner_id, e);
        }
        Ok(info)
    }

    fn begin(&self, owner_id: &str) -> CryptoResult<InFlight<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(owner_id.to_string()) {
            return Err(CryptoError::conflict(
                "key rotation",
                &format!("rotation of {} already in progress", owner_id),
                error_codes::KEY_ROTATION_FAILED,
            ));
        }
        Ok(InFlight {
            set: &self.in_flight,
            owner_id: owner_id.to_string(),
        })
    }

    pub fn queue_urgent(&self, owner_id: &str) {
        self.urgent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(owner_id.to_string());
    }

    pub fn raise_breach(&self, description: &str, actor_id: &str) {
        let now = self.clock.now();
        self.breach.raise(now, description, actor_id);
        log::warn!("breach signal raised by {}: {}", actor_id, description);
        self.audit.record(
            AuditEvent::new(AuditAction::BreachRaised, actor_id, "key_rotation", now).with_detail("description", description),
        );
    }

    pub fn clear_breach(&self, actor_id: &str) {
        if self.breach.clear() {
            log::info!("breach signal cleared by {}", actor_id);
            self.audit.record(AuditEvent::new(
                AuditAction::BreachCleared,
                actor_id,
                "key_rotation",
                self.clock.now(),
            ));
        }
    }

    pub fn is_breach_active(&self) -> bool {
        self.breach.is_active()
    }

    fn active_breach(&self) -> Option<BreachState> {
        if self.config.breach_forces_rotation {
            self.breach.current()
        } else {
            None
        }
    }

    pub fn stats(&self) -> CryptoResult<RotationStats> {
        let now = self.clock.now();
        let keys = self.engine.key_store().list()?;
        let threshold = clock::checked_sub(now, self.config.rotation_age())?;

        let overdue = keys.iter().filter(|k| k.created_at < threshold).count();
        let average_key_age_days = if keys.is_empty() {
            0.0
        } else {
            let total_secs: i64 = keys.iter().map(|k| k.age(now).num_seconds()).sum();
            total_secs as f64 / keys.len() as f64 / 86_400.0
        };
        let breach = self.breach.current();

        Ok(RotationStats {
            total_keys: keys.len(),
            overdue,
            average_key_age_days,
            breach_active: breach.is_some(),
            breach,
            pending_urgent: self.urgent.lock().unwrap_or_else(|e| e.into_inner()).len(),
            rotation_frequency_days: self.config.rotation_frequency_days,
        })
    }

    /// Run `run_scheduled_pass` every `schedule_interval` in the background.
    pub fn spawn(self: &Arc<Self>) -> CryptoResult<PeriodicTask> {
        let scheduler = Arc::downgrade(self);
        PeriodicTask::spawn("key-rotation", self.config.schedule_interval(), move || {
            if let Some(scheduler) = scheduler.upgrade() {
                if let Err(e) = scheduler.run_scheduled_pass() {
                    log::error!("scheduled key rotation pass failed: {}", e);
                }
            }
        })
    }
}

impl RotationTrigger for KeyRotationScheduler {
    fn request_rotation(&self, owner_id: &str, reason: RotationReason, actor_id: &str) {
        match self.rotate_now(owner_id, reason, actor_id) {
            Ok(_) => {}
            Err(CryptoError::NotFound { .. }) => {
                log::warn!("{} rotation requested for {} but it holds no key pair", reason.as_str(), owner_id);
            }
            Err(e) => {
                log::warn!(
                    "immediate {} rotation of {} failed, queued for next pass: {}",
                    reason.as_str(),
                    owner_id,
                    e
                );
                self.queue_urgent(owner_id);
            }
        }
    }

    fn signal_breach(&self, description: &str, actor_id: &str) {
        if self.config.breach_forces_rotation {
            self.raise_breach(description, actor_id);
        } else {
            log::warn!("breach reported by {} but breach_forces_rotation is off: {}", actor_id, description);
        }
    }
}
