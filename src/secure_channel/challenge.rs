use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A server-signed nonce the principal must sign back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Base64 of 32 random bytes. The principal signs these exact
    /// characters.
    pub challenge: String,
    /// Server signature over `signed_payload`.
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Bytes covered by the server's signature.
    pub fn signed_payload(&self, owner_id: &str) -> Vec<u8> {
        format!(
            "docseal-challenge:{}:{}:{}:{}",
            owner_id,
            self.challenge,
            self.timestamp.timestamp_millis(),
            self.expires_at.timestamp_millis()
        )
        .into_bytes()
    }
}

#[derive(Debug, Clone)]
struct PendingChallenge {
    owner_id: String,
    expires_at: DateTime<Utc>,
}

/// Outstanding challenges. Each is accepted at most once.
#[derive(Default)]
pub(crate) struct ChallengeBook {
    pending: Mutex<HashMap<String, PendingChallenge>>,
}

impl ChallengeBook {
    pub(crate) fn insert(&self, challenge: &str, owner_id: &str, expires_at: DateTime<Utc>) {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(
            challenge.to_string(),
            PendingChallenge {
                owner_id: owner_id.to_string(),
                expires_at,
            },
        );
    }

    /// Consume `challenge` for `owner_id`. A challenge issued to someone
    /// else is left in place.
    pub(crate) fn take(&self, challenge: &str, owner_id: &str, now: DateTime<Utc>) -> Result<(), &'static str> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match pending.get(challenge) {
            None => return Err("unknown or already used challenge"),
            Some(entry) if entry.owner_id != owner_id => return Err("challenge issued to another principal"),
            Some(entry) => entry.expires_at <= now,
        };
        pending.remove(challenge);
        if expired {
            Err("challenge expired")
        } else {
            Ok(())
        }
    }

    pub(crate) fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        pending.retain(|_, entry| entry.expires_at > now);
        before - pending.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
