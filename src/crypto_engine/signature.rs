// RSASSA-PKCS1-v1_5 / SHA-256 signatures and RSA-OAEP key wrapping

use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::secure_memory::SecureBytes;

pub fn sign_with_key(private_key: &RsaPrivateKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key.try_sign(data).map_err(|e| {
        CryptoError::operation_failed("sign", &format!("Signing failed: {}", e), error_codes::SIGNING_FAILED)
    })?;
    Ok(signature.to_vec())
}

/// Check a signature against `public_key`.
///
/// A signature of the wrong length is reported as `InvalidInput` before any
/// modular arithmetic is attempted; a well-formed but wrong signature is
/// `Ok(false)`.
pub fn verify_with_public_key(public_key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> CryptoResult<bool> {
    if signature.len() != public_key.size() {
        return Err(CryptoError::invalid_input(
            "signature",
            &format!("expected {} bytes, got {}", public_key.size(), signature.len()),
            error_codes::INVALID_ENCODING,
        ));
    }

    let signature = match Signature::try_from(signature) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    Ok(verifying_key.verify(data, &signature).is_ok())
}

/// Encrypt a symmetric key to `public_key` with RSA-OAEP-SHA256.
pub fn wrap_key(public_key: &RsaPublicKey, key: &SecureBytes) -> CryptoResult<Vec<u8>> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| {
            CryptoError::operation_failed("wrap_key", &format!("OAEP encryption failed: {}", e), error_codes::ENCRYPTION_FAILED)
        })
}

pub fn unwrap_key(private_key: &RsaPrivateKey, wrapped: &[u8]) -> CryptoResult<SecureBytes> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map(SecureBytes::from)
        .map_err(|e| {
            CryptoError::integrity_failure("unwrap_key", &format!("OAEP decryption failed: {}", e), error_codes::AEAD_TAG_MISMATCH)
        })
}
