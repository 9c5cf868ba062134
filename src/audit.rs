/*!
 * Security Audit Trail
 *
 * Audit logging is an external collaborator reached through `AuditSink`.
 * Writes are fire-and-forget: `AuditTrail` logs and swallows sink failures so
 * an audit outage never decides the outcome of a cryptographic operation.
 */

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CryptoResult;

/// Actions recorded by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    KeyPairGenerated,
    KeyRotated,
    KeyRotationFailed,
    CertificateIssued,
    CertificateRevoked,
    CertificateSuperseded,
    CertificatesExpired,
    BreachRaised,
    BreachCleared,
    MessageRejected,
    ChallengeVerified,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::KeyPairGenerated => "key_pair_generated",
            AuditAction::KeyRotated => "key_rotated",
            AuditAction::KeyRotationFailed => "key_rotation_failed",
            AuditAction::CertificateIssued => "certificate_issued",
            AuditAction::CertificateRevoked => "certificate_revoked",
            AuditAction::CertificateSuperseded => "certificate_superseded",
            AuditAction::CertificatesExpired => "certificates_expired",
            AuditAction::BreachRaised => "breach_raised",
            AuditAction::BreachCleared => "breach_cleared",
            AuditAction::MessageRejected => "message_rejected",
            AuditAction::ChallengeVerified => "challenge_verified",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub actor_id: String,
    pub target_id: String,
    pub details: BTreeMap<String, String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor_id: &str, target_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            action,
            actor_id: actor_id.to_string(),
            target_id: target_id.to_string(),
            details: BTreeMap::new(),
            ip: None,
            user_agent: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> CryptoResult<()>;
}

/// Keeps every event in memory. Useful for tests and for operators that
/// ship events elsewhere in batches.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|event| event.action == action)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> CryptoResult<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Writes events through the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AuditEvent) -> CryptoResult<()> {
        let details = serde_json::to_string(&event.details)?;
        log::info!(
            target: "docseal::audit",
            "{} actor={} target={} details={}",
            event.action.as_str(),
            event.actor_id,
            event.target_id,
            details
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.sink.record(&event) {
            log::warn!(
                "audit sink rejected {} for {}: {}",
                event.action.as_str(),
                event.target_id,
                e
            );
        }
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(Arc::new(LogAuditSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_codes, CryptoError};

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn record(&self, _event: &AuditEvent) -> CryptoResult<()> {
            Err(CryptoError::operation_failed("audit", "database down", error_codes::WORKER_FAILED))
        }
    }

    #[test]
    fn test_memory_sink_collects_events() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(sink.clone());

        trail.record(
            AuditEvent::new(AuditAction::CertificateIssued, "admin", "cert-1", Utc::now())
                .with_detail("validity_days", 30),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details.get("validity_days").map(String::as_str), Some("30"));
        assert_eq!(sink.count(AuditAction::CertificateIssued), 1);
    }

    #[test]
    fn test_sink_failures_are_swallowed() {
        let trail = AuditTrail::new(Arc::new(BrokenSink));
        // Must not panic or propagate
        trail.record(AuditEvent::new(AuditAction::KeyRotated, "system", "alice", Utc::now()));
    }
}
