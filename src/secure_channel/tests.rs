use std::sync::Arc;

use chrono::Duration;

use super::*;
use crate::audit::AuditAction;
use crate::certificates::{IssueOptions, RevocationReason};
use crate::clock::Clock;
use crate::config::ChannelConfig;
use crate::error::{error_codes, CryptoError};
use crate::test_support::{harness, Harness};

fn channel(h: &Harness) -> SecureChannel {
    channel_with(h, ChannelConfig::default())
}

fn channel_with(h: &Harness, config: ChannelConfig) -> SecureChannel {
    SecureChannel::new(config, h.engine.clone(), h.registry.clone(), h.trail()).unwrap()
}

/// Envelope a client would send to the server.
fn client_envelope(h: &Harness, channel: &SecureChannel, message: &[u8]) -> Envelope {
    let server_key = channel.server_public_key().unwrap();
    seal(&h.engine, &server_key, message, h.clock.now()).unwrap()
}

fn certified(h: &Harness, owner_id: &str) -> String {
    h.registry
        .issue(owner_id, None, IssueOptions::default(), "admin")
        .unwrap()
        .id
}

#[test]
fn test_server_key_is_provisioned() {
    let h = harness();
    let channel = channel(&h);
    let key = channel.server_public_key().unwrap();
    assert!(key.contains("BEGIN PUBLIC KEY"));
    assert!(h.engine.key_store().public_key("docseal-server").unwrap().is_some());
}

#[test]
fn test_client_to_server_roundtrip() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let encoded = client_envelope(&h, &channel, b"hello server").encode().unwrap();
    assert_eq!(channel.decrypt_from(&encoded, "alice").unwrap(), b"hello server");
}

#[test]
fn test_server_to_client_roundtrip() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let encoded = channel.encrypt_for("alice", b"hello alice").unwrap();
    let envelope = Envelope::decode(&encoded, 1 << 20).unwrap();
    assert_eq!(envelope.version, ENVELOPE_VERSION);
    assert_eq!(envelope.algorithm, EnvelopeAlgorithm::RsaOaep256A256Gcm);
    assert_eq!(open(&h.engine, "alice", &envelope).unwrap(), b"hello alice");

    // A fresh one-time key per message
    let again = Envelope::decode(&channel.encrypt_for("alice", b"hello alice").unwrap(), 1 << 20).unwrap();
    assert_ne!(again.encrypted_session_key, envelope.encrypted_session_key);
    assert_ne!(again.iv, envelope.iv);
}

#[test]
fn test_strict_mode_refuses_untrusted_recipient() {
    let h = harness();
    let channel = channel(&h);
    h.engine.ensure_key_pair("uncertified").unwrap();

    let err = channel.encrypt_for("uncertified", b"secret").unwrap_err();
    assert_eq!(err.error_code(), error_codes::CERTIFICATE_UNTRUSTED);

    let id = certified(&h, "revoked");
    h.registry
        .revoke(&id, RevocationReason::PrivilegeWithdrawn, None, "admin")
        .unwrap();
    assert!(channel.encrypt_for("revoked", b"secret").is_err());
}

#[test]
fn test_lenient_mode_skips_certificate_check() {
    let h = harness();
    let config = ChannelConfig {
        strict_verification: false,
        ..ChannelConfig::default()
    };
    let channel = channel_with(&h, config);
    h.engine.ensure_key_pair("uncertified").unwrap();

    assert!(channel.encrypt_for("uncertified", b"secret").is_ok());
    let encoded = client_envelope(&h, &channel, b"hi").encode().unwrap();
    assert_eq!(channel.decrypt_from(&encoded, "uncertified").unwrap(), b"hi");
}

#[test]
fn test_replayed_envelope_rejected() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let encoded = client_envelope(&h, &channel, b"transfer 100").encode().unwrap();
    h.clock.advance(Duration::minutes(11));

    let err = channel.decrypt_from(&encoded, "alice").unwrap_err();
    assert!(matches!(err, CryptoError::ChannelFailure));
    assert_eq!(err.public_message(), "failed to process message");

    let rejected = h
        .audit
        .events()
        .into_iter()
        .find(|e| e.action == AuditAction::MessageRejected)
        .unwrap();
    assert_eq!(
        rejected.details.get("error_code"),
        Some(&error_codes::REPLAY_REJECTED.to_string())
    );
}

#[test]
fn test_rewritten_timestamp_fails_authentication() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let mut envelope = client_envelope(&h, &channel, b"transfer 100");
    h.clock.advance(Duration::minutes(11));
    envelope.timestamp = h.clock.now().timestamp_millis();

    let err = channel.decrypt_from(&envelope.encode().unwrap(), "alice").unwrap_err();
    assert!(matches!(err, CryptoError::ChannelFailure));
}

#[test]
fn test_future_timestamp_rejected() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let server_key = channel.server_public_key().unwrap();
    let envelope = seal(&h.engine, &server_key, b"early", h.clock.now() + Duration::minutes(5)).unwrap();
    assert!(channel.decrypt_from(&envelope.encode().unwrap(), "alice").is_err());
}

#[test]
fn test_widest_windows_and_zero_skew() {
    let h = harness();
    let config = ChannelConfig {
        session_key_expiry_minutes: crate::config::MAX_CHANNEL_WINDOW_MINUTES,
        challenge_ttl_minutes: crate::config::MAX_CHANNEL_WINDOW_MINUTES,
        replay_window_minutes: crate::config::MAX_CHANNEL_WINDOW_MINUTES,
        max_clock_skew_secs: 0,
        ..ChannelConfig::default()
    };
    let channel = channel_with(&h, config);
    certified(&h, "alice");

    let session = channel.create_session("alice").unwrap();
    assert_eq!(session.expires_at - h.clock.now(), Duration::weeks(1));
    let challenge = channel.issue_challenge("alice").unwrap();
    assert_eq!(challenge.expires_at - challenge.timestamp, Duration::weeks(1));

    // Zero skew still accepts an envelope stamped with the current time
    let encoded = client_envelope(&h, &channel, b"on time").encode().unwrap();
    h.clock.advance(Duration::days(6));
    assert_eq!(channel.decrypt_from(&encoded, "alice").unwrap(), b"on time".to_vec());
}

#[test]
fn test_malformed_and_oversized_rejected_before_crypto() {
    let h = harness();
    let config = ChannelConfig {
        max_envelope_bytes: 4096,
        ..ChannelConfig::default()
    };
    let channel = channel_with(&h, config);

    let err = channel.decrypt_from(&"A".repeat(5000), "alice").unwrap_err();
    assert_eq!(err.error_code(), error_codes::PAYLOAD_TOO_LARGE);

    let err = channel.decrypt_from("!!not-base64!!", "alice").unwrap_err();
    assert_eq!(err.error_code(), error_codes::MALFORMED_ENVELOPE);

    let missing_fields = base64::encode(r#"{"version":1,"iv":"AAAA"}"#);
    let err = channel.decrypt_from(&missing_fields, "alice").unwrap_err();
    assert_eq!(err.error_code(), error_codes::MALFORMED_ENVELOPE);

    let mut envelope = client_envelope(&h, &channel, b"x");
    envelope.session_id = String::new();
    let err = channel.decrypt_from(&envelope.encode().unwrap(), "alice").unwrap_err();
    assert_eq!(err.error_code(), error_codes::MALFORMED_ENVELOPE);

    // Nothing reached the cryptographic stage
    assert_eq!(h.audit.count(AuditAction::MessageRejected), 0);
}

#[test]
fn test_tampered_content_collapses_to_generic_failure() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let mut envelope = client_envelope(&h, &channel, b"pay bob");
    let mut content = base64::decode(&envelope.encrypted_content).unwrap();
    content[0] ^= 0x01;
    envelope.encrypted_content = base64::encode(content);

    let err = channel.decrypt_from(&envelope.encode().unwrap(), "alice").unwrap_err();
    assert!(matches!(err, CryptoError::ChannelFailure));
}

#[test]
fn test_revoked_sender_rejected() {
    let h = harness();
    let channel = channel(&h);
    let id = certified(&h, "alice");
    let encoded = client_envelope(&h, &channel, b"hello").encode().unwrap();

    h.registry
        .revoke(&id, RevocationReason::AffiliationChanged, None, "admin")
        .unwrap();
    assert!(matches!(
        channel.decrypt_from(&encoded, "alice").unwrap_err(),
        CryptoError::ChannelFailure
    ));
}

#[test]
fn test_session_reuse_and_expiry() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let first = channel.create_session("alice").unwrap();
    assert!(!first.reused);
    let second = channel.create_session("alice").unwrap();
    assert!(second.reused);
    assert_eq!(second.session_id, first.session_id);

    // Same key, wrapped afresh
    let k1 = h.engine.unwrap_key("alice", &base64::decode(&first.encrypted_session_key).unwrap()).unwrap();
    let k2 = h.engine.unwrap_key("alice", &base64::decode(&second.encrypted_session_key).unwrap()).unwrap();
    assert_eq!(k1, k2);

    h.clock.advance(Duration::minutes(31));
    // Expired entries are never served, sweep or not
    let third = channel.create_session("alice").unwrap();
    assert!(!third.reused);
    assert_ne!(third.session_id, first.session_id);

    h.clock.advance(Duration::minutes(31));
    assert_eq!(channel.sweep().sessions, 1);
    assert_eq!(channel.cached_sessions(), 0);
}

#[test]
fn test_challenge_response() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let challenge = channel.issue_challenge("alice").unwrap();
    assert_eq!(challenge.expires_at - challenge.timestamp, Duration::minutes(5));

    // The server's signature checks out against its public key
    let server_key = channel.server_public_key().unwrap();
    assert!(h
        .engine
        .verify_with_public_key(&server_key, &challenge.signed_payload("alice"), &challenge.signature)
        .unwrap());

    let response = h.engine.sign("alice", challenge.challenge.as_bytes()).unwrap();
    assert!(channel
        .verify_challenge_response("alice", &challenge.challenge, &response)
        .unwrap());
    assert_eq!(h.audit.count(AuditAction::ChallengeVerified), 1);

    // Single use
    assert!(!channel
        .verify_challenge_response("alice", &challenge.challenge, &response)
        .unwrap());
}

#[test]
fn test_challenge_rejections() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");
    certified(&h, "mallory");

    // Signed by someone else
    let challenge = channel.issue_challenge("alice").unwrap();
    let forged = h.engine.sign("mallory", challenge.challenge.as_bytes()).unwrap();
    assert!(!channel
        .verify_challenge_response("alice", &challenge.challenge, &forged)
        .unwrap());

    // Answered after expiry
    let challenge = channel.issue_challenge("alice").unwrap();
    let response = h.engine.sign("alice", challenge.challenge.as_bytes()).unwrap();
    h.clock.advance(Duration::minutes(6));
    assert!(!channel
        .verify_challenge_response("alice", &challenge.challenge, &response)
        .unwrap());

    // Garbage signature encoding
    let challenge = channel.issue_challenge("alice").unwrap();
    assert!(!channel
        .verify_challenge_response("alice", &challenge.challenge, "@@@")
        .unwrap());

    // Someone else's challenge stays usable by its owner
    let challenge = channel.issue_challenge("alice").unwrap();
    let mallory = h.engine.sign("mallory", challenge.challenge.as_bytes()).unwrap();
    assert!(!channel
        .verify_challenge_response("mallory", &challenge.challenge, &mallory)
        .unwrap());
    let response = h.engine.sign("alice", challenge.challenge.as_bytes()).unwrap();
    assert!(channel
        .verify_challenge_response("alice", &challenge.challenge, &response)
        .unwrap());
}

#[test]
fn test_handshake() {
    let h = harness();
    let channel = channel(&h);
    certified(&h, "alice");

    let handshake = channel.handshake("alice").unwrap();
    assert_eq!(handshake.session.owner_id, "alice");
    assert_eq!(handshake.server_public_key, channel.server_public_key().unwrap());
    assert_eq!(channel.pending_challenges(), 1);

    h.clock.advance(Duration::minutes(40));
    let report = channel.sweep();
    assert_eq!(report.sessions, 1);
    assert_eq!(report.challenges, 1);
}

#[test]
fn test_sweeper_task_evicts_expired_sessions() {
    let h = harness();
    certified(&h, "alice");
    let config = ChannelConfig {
        sweep_interval_secs: 1,
        ..ChannelConfig::default()
    };
    let channel = Arc::new(channel_with(&h, config));
    channel.create_session("alice").unwrap();
    h.clock.advance(Duration::minutes(31));

    let task = channel.spawn_sweeper().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1500));
    task.stop();
    assert_eq!(channel.cached_sessions(), 0);
}
