use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Key, Nonce, Tag,
};

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::secure_memory::SecureBytes;
use crate::utils;

/// AES-256 key length in bytes
pub const DOCUMENT_KEY_LEN: usize = 32;
/// GCM nonce length in bytes
pub const IV_LEN: usize = 12;
/// GCM tag length in bytes
pub const TAG_LEN: usize = 16;

/// Output of `encrypt_document`. The key is fresh for every call and is
/// the caller's to protect.
#[derive(Debug, Clone)]
pub struct EncryptedDocument {
    pub ciphertext: Vec<u8>,
    pub key: SecureBytes,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// AES-256-GCM with a detached tag
///
/// Shared by document encryption and the secure channel body. Decryption
/// authenticates before releasing anything: on a tag mismatch the buffer is
/// dropped and `IntegrityFailure` returned.
pub struct DocumentCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for DocumentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCipher")
            .field("cipher", &"[AES-256-GCM Cipher]")
            .finish()
    }
}

impl DocumentCipher {
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        if key.len() != DOCUMENT_KEY_LEN {
            return Err(CryptoError::invalid_input(
                "key",
                &format!("expected {} bytes, got {}", DOCUMENT_KEY_LEN, key.len()),
                error_codes::INVALID_PARAMETER,
            ));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, iv: &[u8], aad: &[u8], plaintext: &[u8]) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
        check_iv(iv)?;
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(iv), aad, &mut buffer)
            .map_err(|_| {
                CryptoError::operation_failed("aes_gcm_encrypt", "encryption failed", error_codes::ENCRYPTION_FAILED)
            })?;
        Ok((buffer, tag.to_vec()))
    }

    pub fn decrypt(&self, iv: &[u8], aad: &[u8], ciphertext: &[u8], auth_tag: &[u8]) -> CryptoResult<Vec<u8>> {
        check_iv(iv)?;
        if auth_tag.len() != TAG_LEN {
            return Err(CryptoError::invalid_input(
                "auth_tag",
                &format!("expected {} bytes, got {}", TAG_LEN, auth_tag.len()),
                error_codes::INVALID_PARAMETER,
            ));
        }

        let mut buffer = ciphertext.to_vec();
        match self.cipher.decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad,
            &mut buffer,
            Tag::from_slice(auth_tag),
        ) {
            Ok(()) => Ok(buffer),
            Err(_) => {
                utils::secure_zero(&mut buffer);
                Err(CryptoError::integrity_failure(
                    "aes_gcm_decrypt",
                    "authentication tag mismatch",
                    error_codes::AEAD_TAG_MISMATCH,
                ))
            }
        }
    }
}

fn check_iv(iv: &[u8]) -> CryptoResult<()> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::invalid_input(
            "iv",
            &format!("expected {} bytes, got {}", IV_LEN, iv.len()),
            error_codes::INVALID_PARAMETER,
        ));
    }
    Ok(())
}

/// Encrypt `plaintext` under a freshly generated key and IV.
pub fn encrypt_document(plaintext: &[u8]) -> CryptoResult<EncryptedDocument> {
    let key = SecureBytes::from(utils::random_bytes(DOCUMENT_KEY_LEN)?);
    let iv = utils::random_bytes(IV_LEN)?;
    let (ciphertext, auth_tag) = DocumentCipher::new(key.as_bytes())?.encrypt(&iv, &[], plaintext)?;

    Ok(EncryptedDocument {
        ciphertext,
        key,
        iv,
        auth_tag,
    })
}

/// Decrypt a document. Fails closed with `IntegrityFailure` when the tag
/// does not verify.
pub fn decrypt_document(ciphertext: &[u8], key: &[u8], iv: &[u8], auth_tag: &[u8]) -> CryptoResult<Vec<u8>> {
    DocumentCipher::new(key)?.decrypt(iv, &[], ciphertext, auth_tag)
}
