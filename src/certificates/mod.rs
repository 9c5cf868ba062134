/*!
 * Certificate lifecycle
 *
 * Certificates bind a principal to a public key. Status moves
 * `Pending -> Active -> {Expired, Revoked}`; the time-based transitions are
 * applied lazily by every read path and in bulk by `cleanup_expired`.
 * Revocation is terminal, checked against double application, and
 * reflected in the cached CRL before `revoke` returns.
 */

mod certificate;
mod crl;
mod registry;
mod store;


pub use certificate::{
    fingerprint, key_id, normalize_public_key, public_key_hash, Capabilities, Certificate, CertificateMetadata,
    CertificateStatus, CertificateVerification, IssueOptions, Revocation, RevocationReason, SecurityLevel,
    VerificationFailure,
};
pub use crl::{CrlEntry, CrlSnapshot};
pub use registry::{CertificateRegistry, CertificateStats};
pub use store::{CertificateStore, MemoryCertificateStore};
