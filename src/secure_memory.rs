/*!
 * Secure memory handling utilities
 *
 * Private key material, passphrases and one-time session keys live in
 * `SecureBytes`, which zeroes its buffer when dropped and never prints its
 * contents through `Debug`.
 */

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A container for sensitive bytes that is zeroized on drop
///
/// # Example
///
/// ```
/// use docseal::secure_memory::SecureBytes;
///
/// let key = SecureBytes::new(&[0x42; 32]);
/// assert_eq!(key.len(), 32);
/// // When key goes out of scope, memory is securely zeroed
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecureBytes {
    bytes: Vec<u8>,
}

impl SecureBytes {
    /// Create a new SecureBytes holding a copy of `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
        }
    }

    /// Get a reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Interpret the contents as UTF-8 (PEM documents, hex passphrases).
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Clear the buffer, securely zeroing all data
    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes([REDACTED; {}])", self.bytes.len())
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<String> for SecureBytes {
    fn from(value: String) -> Self {
        Self {
            bytes: value.into_bytes(),
        }
    }
}

impl From<&[u8]> for SecureBytes {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Securely zero memory after a function has completed
///
/// The data is zeroized when the closure returns, returns early or panics.
///
/// ```
/// use docseal::secure_memory::with_secure_scope;
///
/// let mut key = [7u8; 32];
/// let sum: u32 = with_secure_scope(&mut key, |k| k.iter().map(|b| *b as u32).sum());
/// assert_eq!(sum, 7 * 32);
/// assert_eq!(key, [0u8; 32]);
/// ```
pub fn with_secure_scope<T, F, R>(data: &mut T, f: F) -> R
where
    T: Zeroize,
    F: FnOnce(&mut T) -> R,
{
    struct ScopeGuard<'a, T: Zeroize> {
        data: &'a mut T,
    }

    impl<'a, T: Zeroize> Drop for ScopeGuard<'a, T> {
        fn drop(&mut self) {
            self.data.zeroize();
        }
    }

    let guard = ScopeGuard { data };
    f(guard.data)
}
