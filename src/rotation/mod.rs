/*!
 * Key rotation
 *
 * `KeyRotationScheduler` rotates key pairs older than the configured age on
 * a fixed schedule, rotates on demand, and drains every principal after a
 * breach signal. The certificate registry reaches it through the
 * `RotationTrigger` seam.
 */

mod breach;
mod scheduler;


use serde::{Deserialize, Serialize};

pub use breach::{BreachSignal, BreachState};
pub use scheduler::{KeyRotationScheduler, RotationPassReport, RotationStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    Scheduled,
    Manual,
    KeyCompromise,
    SecurityIncident,
    Breach,
    /// Retry of an earlier urgent rotation that failed.
    Urgent,
}

impl RotationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::Scheduled => "scheduled",
            RotationReason::Manual => "manual",
            RotationReason::KeyCompromise => "key_compromise",
            RotationReason::SecurityIncident => "security_incident",
            RotationReason::Breach => "breach",
            RotationReason::Urgent => "urgent",
        }
    }
}

/// Hooks the certificate registry calls after a revocation that
/// invalidates key material.
pub trait RotationTrigger: Send + Sync {
    /// Rotate `owner_id` now; if that fails, rotate on the next pass
    /// regardless of key age.
    fn request_rotation(&self, owner_id: &str, reason: RotationReason, actor_id: &str);

    /// Force rotation of every principal over the coming passes.
    fn signal_breach(&self, description: &str, actor_id: &str);
}
