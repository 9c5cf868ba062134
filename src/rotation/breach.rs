use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachState {
    /// Keys created before this instant are considered exposed.
    pub raised_at: DateTime<Utc>,
    pub description: String,
    pub raised_by: String,
}

/// Process-wide breach flag consumed by the rotation scheduler.
#[derive(Debug, Default)]
pub struct BreachSignal {
    state: RwLock<Option<BreachState>>,
}

impl BreachSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. A second raise moves `raised_at` forward so keys
    /// rotated since the first incident are rotated again.
    pub fn raise(&self, now: DateTime<Utc>, description: &str, raised_by: &str) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Some(BreachState {
            raised_at: now,
            description: description.to_string(),
            raised_by: raised_by.to_string(),
        });
    }

    /// Returns whether a signal was active.
    pub fn clear(&self) -> bool {
        self.state.write().unwrap_or_else(|e| e.into_inner()).take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn current(&self) -> Option<BreachState> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
