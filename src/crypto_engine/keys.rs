// RSA key pair generation and the passphrase-protected private key encoding

use hkdf::Hkdf;
use pkcs8::pkcs5::pbes2;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding, PrivateKeyInfo};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::key_store::KeyPair;
use crate::secure_memory::{with_secure_scope, SecureBytes};
use crate::utils;

/// PEM label of an encrypted PKCS#8 document.
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// PBKDF2 iteration count inside the PKCS#8 envelope. The passphrase is
/// already 256 bits of HKDF output, so this only slows down offline guessing
/// of a leaked server secret.
const PBKDF2_ROUNDS: u32 = 10_000;

const PASSPHRASE_SALT: &[u8] = b"docseal/private-key-passphrase";

/// Derive the passphrase protecting `owner_id`'s private key encoding.
///
/// `hex(HKDF-SHA256(ikm = server_secret, salt = PASSPHRASE_SALT, info = owner_id))`.
/// Nothing besides the server secret is needed to reproduce it, so anyone
/// holding the server secret can decode every stored private key encoding.
pub fn derive_passphrase(server_secret: &[u8], owner_id: &str) -> CryptoResult<SecureBytes> {
    utils::validate_owner_id(owner_id)?;
    if server_secret.is_empty() {
        return Err(CryptoError::invalid_input(
            "server_secret",
            "must not be empty",
            error_codes::INVALID_PARAMETER,
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(PASSPHRASE_SALT), server_secret);
    let mut okm = [0u8; 32];
    with_secure_scope(&mut okm, |okm| {
        hk.expand(owner_id.as_bytes(), &mut okm[..]).map_err(|e| {
            CryptoError::operation_failed("derive_passphrase", &e.to_string(), error_codes::KEY_DERIVATION_FAILED)
        })?;
        Ok(SecureBytes::from(hex::encode(&okm[..])))
    })
}

/// Generate an RSA key pair for `owner_id`. Blocking and CPU heavy; callers
/// run it under a deadline.
pub(crate) fn generate_rsa_key_pair(owner_id: &str, bits: usize, passphrase: &SecureBytes) -> CryptoResult<KeyPair> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| {
        CryptoError::operation_failed(
            "generate_key_pair",
            &format!("Failed to generate RSA key: {}", e),
            error_codes::KEY_GENERATION_FAILED,
        )
    })?;

    let public_key_pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| {
            CryptoError::operation_failed(
                "generate_key_pair",
                &format!("Failed to encode RSA public key: {}", e),
                error_codes::KEY_GENERATION_FAILED,
            )
        })?;
    let private_key = encode_protected_private_key(&private_key, passphrase)?;

    Ok(KeyPair {
        owner_id: owner_id.to_string(),
        public_key_pem,
        private_key,
    })
}

/// PKCS#8 PBES2 (PBKDF2-SHA256, AES-256-CBC) PEM of `private_key`.
pub(crate) fn encode_protected_private_key(private_key: &RsaPrivateKey, passphrase: &SecureBytes) -> CryptoResult<SecureBytes> {
    let encoding_failed = |cause: String| {
        CryptoError::operation_failed("encode_private_key", &cause, error_codes::KEY_GENERATION_FAILED)
    };

    let der = private_key.to_pkcs8_der().map_err(|e| encoding_failed(e.to_string()))?;
    let info = PrivateKeyInfo::try_from(der.as_bytes()).map_err(|e| encoding_failed(e.to_string()))?;

    let salt = utils::random_bytes(16)?;
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&utils::random_bytes(16)?);
    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ROUNDS, &salt, &iv)
        .map_err(|e| encoding_failed(e.to_string()))?;

    let encrypted = info
        .encrypt_with_params(params, passphrase.as_bytes())
        .map_err(|e| encoding_failed(e.to_string()))?;
    let pem = encrypted
        .to_pem(ENCRYPTED_PRIVATE_KEY_LABEL, LineEnding::LF)
        .map_err(|e| encoding_failed(e.to_string()))?;

    Ok(SecureBytes::new(pem.as_bytes()))
}

pub(crate) fn decode_protected_private_key(pem: &SecureBytes, passphrase: &SecureBytes) -> CryptoResult<RsaPrivateKey> {
    let pem = pem.as_str().ok_or_else(|| {
        CryptoError::integrity_failure(
            "decode_private_key",
            "private key encoding is not UTF-8",
            error_codes::KEY_DECODING_FAILED,
        )
    })?;

    RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes()).map_err(|e| {
        CryptoError::integrity_failure(
            "decode_private_key",
            &format!("cannot decode protected private key: {}", e),
            error_codes::KEY_DECODING_FAILED,
        )
    })
}

pub fn parse_public_key(pem: &str) -> CryptoResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim()).map_err(|e| {
        CryptoError::invalid_input("public_key", &format!("not an RSA SPKI PEM: {}", e), error_codes::INVALID_ENCODING)
    })
}
