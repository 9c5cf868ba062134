/*!
 * DocSeal Trust Core
 *
 * Certificate lifecycle and secure end-to-end messaging for a
 * document-management platform:
 *
 * - `key_store`: per-principal RSA key pairs, private halves sealed at rest
 * - `crypto_engine`: signatures, document AEAD, hashing and integrity tokens
 * - `certificates`: issuance, revocation, verification and the CRL
 * - `rotation`: scheduled, forced and breach-driven key rotation
 * - `secure_channel`: hybrid-encryption envelopes, session keys and
 *   challenge/response
 *
 * `service::DocSealService` wires all of them from a `config::CoreConfig`.
 */

/// Security audit events and sinks
pub mod audit;

/// Certificate registry, store and revocation list
pub mod certificates;

/// Time source used by every expiry and age check
pub mod clock;

/// Configuration surface with safe defaults
pub mod config;

/// Stateless cryptographic primitives
pub mod crypto_engine;

/// Lookup of principals owned by the user-management collaborator
pub mod directory;

/// Common error types
pub mod error;

/// Encrypted-at-rest key pair storage
pub mod key_store;

/// Key rotation scheduling and breach handling
pub mod rotation;

/// Hybrid-encryption message channel
pub mod secure_channel;

/// Secure memory handling utilities
pub mod secure_memory;

/// Upward-facing operations with ownership checks
pub mod service;

/// Background timers
pub mod tasks;

/// Utilities for cryptographic operations
pub mod utils;

#[cfg(test)]
mod test_support;

pub use certificates::{Certificate, CertificateRegistry, CertificateStatus, RevocationReason};
pub use config::CoreConfig;
pub use crypto_engine::CryptoEngine;
pub use error::{CryptoError, CryptoResult};
pub use key_store::KeyStore;
pub use rotation::KeyRotationScheduler;
pub use secure_channel::SecureChannel;
pub use service::DocSealService;

/// The most commonly used types in one import.
pub mod prelude {
    pub use crate::audit::{AuditAction, AuditEvent, AuditSink, AuditTrail, LogAuditSink, MemoryAuditSink};
    pub use crate::certificates::{
        Capabilities, Certificate, CertificateRegistry, CertificateStats, CertificateStatus, CertificateVerification,
        CrlEntry, CrlSnapshot, IssueOptions, RevocationReason, SecurityLevel, VerificationFailure,
    };
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::CoreConfig;
    pub use crate::crypto_engine::{CryptoEngine, EncryptedDocument, IntegrityStatus, IntegrityVerification};
    pub use crate::directory::{MemoryUserDirectory, User, UserDirectory};
    pub use crate::error::{CryptoError, CryptoResult};
    pub use crate::key_store::{KeyStore, MasterKey};
    pub use crate::rotation::{KeyRotationScheduler, RotationReason, RotationStats};
    pub use crate::secure_channel::{Challenge, Envelope, Handshake, SecureChannel, SessionInfo};
    pub use crate::secure_memory::SecureBytes;
    pub use crate::service::{
        DocSealService, IssueCertificateRequest, Principal, ReceivedMessage, RevokeCertificateRequest,
    };
}
