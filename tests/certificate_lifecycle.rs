mod common;

use chrono::Duration;
use docseal::audit::AuditAction;
use docseal::certificates::{CertificateStatus, RevocationReason, VerificationFailure};
use docseal::error::error_codes;
use docseal::service::{IssueCertificateRequest, RevokeCertificateRequest};

use common::{admin, service, user};

fn issue(t: &common::TestService, owner: &str, days: u32) -> docseal::Certificate {
    t.service
        .issue_certificate(
            &user(owner),
            IssueCertificateRequest {
                validity_days: Some(days),
                ..IssueCertificateRequest::default()
            },
        )
        .unwrap()
}

#[test]
fn test_expiry_then_compromise_rotation() {
    let t = service();

    // Valid when issued
    let certificate = issue(&t, "alice", 30);
    let verification = t.service.verify_certificate(&certificate.id).unwrap();
    assert!(verification.valid);
    assert_eq!(verification.status, Some(CertificateStatus::Active));

    // Expired 31 days later without any sweep
    t.clock.advance(Duration::days(31));
    let verification = t.service.verify_certificate(&certificate.id).unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.status, Some(CertificateStatus::Expired));
    assert_eq!(verification.failure, Some(VerificationFailure::Expired));

    // A fresh certificate revoked for compromise gets a new key right away,
    // though the key is far younger than the rotation frequency
    let fresh = issue(&t, "alice", 30);
    let before = t.service.engine().key_store().info("alice").unwrap().unwrap();
    let old_key = t.service.engine().key_store().public_key("alice").unwrap().unwrap();

    t.service
        .revoke_certificate(
            &user("alice"),
            &RevokeCertificateRequest {
                certificate_id: fresh.id.clone(),
                reason: RevocationReason::KeyCompromise,
                details: Some("laptop stolen".to_string()),
            },
        )
        .unwrap();

    let after = t.service.engine().key_store().info("alice").unwrap().unwrap();
    assert_eq!(after.generation, before.generation + 1);
    assert_ne!(t.service.engine().key_store().public_key("alice").unwrap().unwrap(), old_key);
    assert_eq!(t.audit.count(AuditAction::KeyRotated), 1);

    // The revoked certificate is in the CRL already
    assert!(t.service.crl().unwrap().contains(&fresh.id));

    // The next scheduled pass has nothing left to do for alice
    let report = t.service.scheduler().run_scheduled_pass().unwrap();
    assert!(report.rotated.is_empty());
}

#[test]
fn test_cleanup_sweep_is_idempotent() {
    let t = service();
    issue(&t, "alice", 1);
    issue(&t, "bob", 1);
    issue(&t, "carol", 90);

    t.clock.advance(Duration::days(2));
    assert_eq!(t.service.cleanup_expired(&admin()).unwrap(), 2);
    assert_eq!(t.service.cleanup_expired(&admin()).unwrap(), 0);

    let stats = t.service.certificate_stats(&admin()).unwrap();
    assert_eq!(stats.expired, 2);
    assert_eq!(stats.active, 1);
}

#[test]
fn test_double_revocation_and_terminal_states() {
    let t = service();
    let certificate = issue(&t, "alice", 30);
    let request = RevokeCertificateRequest {
        certificate_id: certificate.id.clone(),
        reason: RevocationReason::CessationOfOperation,
        details: None,
    };

    let revoked = t.service.revoke_certificate(&user("alice"), &request).unwrap();
    assert_eq!(revoked.status, CertificateStatus::Revoked);
    assert_eq!(revoked.revocation.as_ref().unwrap().revoked_by, "alice");

    let err = t.service.revoke_certificate(&user("alice"), &request).unwrap_err();
    assert_eq!(err.error_code(), error_codes::ALREADY_REVOKED);

    // Same key and owner, so a later issue time keeps the fingerprint unique
    t.clock.advance(Duration::minutes(1));
    let expired = issue(&t, "alice", 1);
    t.clock.advance(Duration::days(2));
    let err = t
        .service
        .revoke_certificate(
            &user("alice"),
            &RevokeCertificateRequest {
                certificate_id: expired.id,
                reason: RevocationReason::Unspecified,
                details: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::TERMINAL_STATE);
}

#[test]
fn test_ownership_is_enforced() {
    let t = service();
    let certificate = issue(&t, "alice", 30);

    // bob cannot revoke, list or issue for alice
    let err = t
        .service
        .revoke_certificate(
            &user("bob"),
            &RevokeCertificateRequest {
                certificate_id: certificate.id.clone(),
                reason: RevocationReason::Unspecified,
                details: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::ACCESS_DENIED);
    assert!(t.service.list_certificates_for_user(&user("bob"), "alice").is_err());
    assert!(t
        .service
        .issue_certificate(
            &user("bob"),
            IssueCertificateRequest {
                owner_id: Some("alice".to_string()),
                ..IssueCertificateRequest::default()
            },
        )
        .is_err());
    assert!(t.service.certificate_stats(&user("bob")).is_err());

    // Nothing changed
    assert!(t.service.verify_certificate(&certificate.id).unwrap().valid);

    // An admin may act for anyone
    let listed = t.service.list_certificates_for_user(&admin(), "alice").unwrap();
    assert_eq!(listed.len(), 1);
    let issued = t
        .service
        .issue_certificate(
            &admin(),
            IssueCertificateRequest {
                owner_id: Some("bob".to_string()),
                ..IssueCertificateRequest::default()
            },
        )
        .unwrap();
    assert_eq!(issued.owner_id, "bob");
    assert_eq!(t.service.list_my_certificates(&user("bob")).unwrap().len(), 1);
}

#[test]
fn test_unknown_user_cannot_be_certified() {
    let t = service();
    let err = t
        .service
        .issue_certificate(
            &admin(),
            IssueCertificateRequest {
                owner_id: Some("mallory".to_string()),
                ..IssueCertificateRequest::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::USER_NOT_FOUND);
}

#[test]
fn test_unknown_certificate_verifies_as_not_found() {
    let t = service();
    let verification = t.service.verify_certificate("no-such-certificate").unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.failure, Some(VerificationFailure::NotFound));
}
