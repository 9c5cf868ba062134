/*!
 * Error handling for the DocSeal cryptographic core
 *
 * Every failure is classified into one taxonomy class (invalid input, not
 * found, conflict, unauthorized, integrity failure, timeout ...) and carries a
 * numeric error code. Internal causes are kept for logs; `public_message`
 * gives the collapsed text that may cross a network boundary.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Comprehensive error type for all cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid input: {parameter} - {reason}")]
    InvalidInput {
        parameter: String,
        reason: String,
        error_code: u32,
    },

    #[error("Not found: {resource} '{id}'")]
    NotFound {
        resource: String,
        id: String,
        error_code: u32,
    },

    #[error("Conflict: {resource} - {details}")]
    Conflict {
        resource: String,
        details: String,
        error_code: u32,
    },

    #[error("Invalid state: {resource} is {state} - {details}")]
    InvalidState {
        resource: String,
        state: String,
        details: String,
        error_code: u32,
    },

    #[error("Unauthorized: {operation} - {cause}")]
    Unauthorized {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Integrity failure: {operation} - {cause}")]
    IntegrityFailure {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Operation timed out: {operation} exceeded {limit_ms} ms")]
    Timeout {
        operation: String,
        limit_ms: u64,
        error_code: u32,
    },

    #[error("Cryptographic operation failed: {operation} - {cause}")]
    OperationFailed {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Key management error: {operation} - {cause}")]
    KeyManagementError {
        operation: String,
        cause: String,
        error_code: u32,
        context: HashMap<String, String>,
    },

    #[error("failed to process message")]
    ChannelFailure,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Error code constants for different error categories
pub mod error_codes {
    // Input errors: 1000-1999
    pub const INVALID_OWNER_ID: u32 = 1001;
    pub const EMPTY_PAYLOAD: u32 = 1002;
    pub const PAYLOAD_TOO_LARGE: u32 = 1003;
    pub const INVALID_ENCODING: u32 = 1004;
    pub const INVALID_PARAMETER: u32 = 1005;
    pub const MALFORMED_ENVELOPE: u32 = 1006;

    // Lookup errors: 2000-2999
    pub const CERTIFICATE_NOT_FOUND: u32 = 2001;
    pub const KEY_NOT_FOUND: u32 = 2002;
    pub const USER_NOT_FOUND: u32 = 2003;

    // Conflict and state errors: 3000-3999
    pub const FINGERPRINT_COLLISION: u32 = 3001;
    pub const ALREADY_REVOKED: u32 = 3002;
    pub const TERMINAL_STATE: u32 = 3003;

    // Authorization errors: 4000-4999
    pub const CERTIFICATE_UNTRUSTED: u32 = 4002;
    pub const REPLAY_REJECTED: u32 = 4003;
    pub const ACCESS_DENIED: u32 = 4004;

    // Integrity errors: 5000-5999
    pub const AEAD_TAG_MISMATCH: u32 = 5001;
    pub const STORED_KEY_CORRUPT: u32 = 5002;

    // Primitive errors: 6000-6999
    pub const KEY_GENERATION_FAILED: u32 = 6001;
    pub const SIGNING_FAILED: u32 = 6002;
    pub const ENCRYPTION_FAILED: u32 = 6003;
    pub const KEY_DECODING_FAILED: u32 = 6004;
    pub const KEY_DERIVATION_FAILED: u32 = 6005;
    pub const WORKER_FAILED: u32 = 6006;
    pub const OPERATION_TIMEOUT: u32 = 6100;

    // Key management errors: 7000-7999
    pub const KEY_STORAGE_FAILED: u32 = 7001;
    pub const KEY_ROTATION_FAILED: u32 = 7003;

    // Channel errors: 8000-8999
    pub const CHANNEL_FAILURE: u32 = 8001;
}

/// Text returned across the network boundary for any cryptographic failure.
pub const GENERIC_FAILURE_MESSAGE: &str = "failed to process message";

impl CryptoError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            CryptoError::InvalidInput { error_code, .. } => *error_code,
            CryptoError::NotFound { error_code, .. } => *error_code,
            CryptoError::Conflict { error_code, .. } => *error_code,
            CryptoError::InvalidState { error_code, .. } => *error_code,
            CryptoError::Unauthorized { error_code, .. } => *error_code,
            CryptoError::IntegrityFailure { error_code, .. } => *error_code,
            CryptoError::Timeout { error_code, .. } => *error_code,
            CryptoError::OperationFailed { error_code, .. } => *error_code,
            CryptoError::KeyManagementError { error_code, .. } => *error_code,
            CryptoError::ChannelFailure => error_codes::CHANNEL_FAILURE,
            CryptoError::SerializationError(_) => 9001,
            CryptoError::IoError(_) => 9002,
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            CryptoError::InvalidInput { .. } => "InvalidInput",
            CryptoError::NotFound { .. } => "NotFound",
            CryptoError::Conflict { .. } => "Conflict",
            CryptoError::InvalidState { .. } => "InvalidState",
            CryptoError::Unauthorized { .. } => "Unauthorized",
            CryptoError::IntegrityFailure { .. } => "IntegrityFailure",
            CryptoError::Timeout { .. } => "Timeout",
            CryptoError::OperationFailed { .. } => "OperationFailed",
            CryptoError::KeyManagementError { .. } => "KeyManagementError",
            CryptoError::ChannelFailure => "ChannelFailure",
            CryptoError::SerializationError(_) => "SerializationError",
            CryptoError::IoError(_) => "IoError",
        }
    }

    /// Transient failures may be retried by the caller unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, CryptoError::Timeout { .. })
    }

    /// Whether this failure came out of a cryptographic check or primitive.
    pub fn is_cryptographic(&self) -> bool {
        matches!(
            self,
            CryptoError::Unauthorized { .. }
                | CryptoError::IntegrityFailure { .. }
                | CryptoError::OperationFailed { .. }
                | CryptoError::ChannelFailure
        )
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            CryptoError::InvalidInput { parameter, .. } => {
                format!("The value supplied for '{}' is not acceptable.", parameter)
            }
            CryptoError::NotFound { resource, .. } => {
                format!("The requested {} does not exist.", resource)
            }
            CryptoError::Conflict { resource, .. } => {
                format!("The {} conflicts with an existing record.", resource)
            }
            CryptoError::InvalidState { resource, state, .. } => {
                format!("The {} is {} and can no longer be changed.", resource, state)
            }
            CryptoError::Timeout { operation, .. } => format!(
                "The operation '{}' took too long. It is safe to retry.",
                operation
            ),
            CryptoError::KeyManagementError { operation, .. } => format!(
                "Key management operation '{}' failed. Secure key storage is not available.",
                operation
            ),
            CryptoError::SerializationError(_) => {
                "Data serialization failed. Data format may be corrupted.".to_string()
            }
            CryptoError::IoError(_) => {
                "Input/output operation failed. Check file permissions and disk space.".to_string()
            }
            CryptoError::Unauthorized { .. }
            | CryptoError::IntegrityFailure { .. }
            | CryptoError::OperationFailed { .. }
            | CryptoError::ChannelFailure => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Message safe to return across a network boundary.
    ///
    /// Cryptographic failures collapse to a single string so responses cannot
    /// be used as a padding or format oracle.
    pub fn public_message(&self) -> String {
        if self.is_cryptographic() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            self.user_friendly_message()
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();

        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("error_type".to_string(), self.error_type().to_string());
        details.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        match self {
            CryptoError::KeyManagementError {
                operation,
                cause,
                context,
                ..
            } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
                details.extend(context.clone());
            }
            CryptoError::IntegrityFailure {
                operation, cause, ..
            }
            | CryptoError::Unauthorized {
                operation, cause, ..
            }
            | CryptoError::OperationFailed {
                operation, cause, ..
            } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            _ => {
                details.insert("details".to_string(), self.to_string());
            }
        }

        details
    }
}

/// Convenience constructors for common error types
impl CryptoError {
    pub fn invalid_input(parameter: &str, reason: &str, error_code: u32) -> Self {
        CryptoError::InvalidInput {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
            error_code,
        }
    }

    pub fn not_found(resource: &str, id: &str, error_code: u32) -> Self {
        CryptoError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
            error_code,
        }
    }

    pub fn conflict(resource: &str, details: &str, error_code: u32) -> Self {
        CryptoError::Conflict {
            resource: resource.to_string(),
            details: details.to_string(),
            error_code,
        }
    }

    pub fn invalid_state(resource: &str, state: &str, details: &str) -> Self {
        CryptoError::InvalidState {
            resource: resource.to_string(),
            state: state.to_string(),
            details: details.to_string(),
            error_code: error_codes::TERMINAL_STATE,
        }
    }

    pub fn unauthorized(operation: &str, cause: &str, error_code: u32) -> Self {
        CryptoError::Unauthorized {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn integrity_failure(operation: &str, cause: &str, error_code: u32) -> Self {
        CryptoError::IntegrityFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn timeout(operation: &str, limit_ms: u64) -> Self {
        CryptoError::Timeout {
            operation: operation.to_string(),
            limit_ms,
            error_code: error_codes::OPERATION_TIMEOUT,
        }
    }

    pub fn operation_failed(operation: &str, cause: &str, error_code: u32) -> Self {
        CryptoError::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn key_management_error(operation: &str, cause: &str, owner_id: &str) -> Self {
        let mut context = HashMap::new();
        context.insert("owner_id".to_string(), owner_id.to_string());

        CryptoError::KeyManagementError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::KEY_STORAGE_FAILED,
            context,
        }
    }
}

// From implementations for automatic error conversion
impl From<std::io::Error> for CryptoError {
    fn from(err: std::io::Error) -> Self {
        CryptoError::IoError(format!("IO operation failed: {}", err))
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

/// Result type alias for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_generation() {
        let error = CryptoError::conflict(
            "certificate",
            "fingerprint already issued",
            error_codes::FINGERPRINT_COLLISION,
        );
        assert_eq!(error.error_code(), error_codes::FINGERPRINT_COLLISION);
        assert_eq!(error.error_type(), "Conflict");
    }

    #[test]
    fn test_public_message_collapses_crypto_failures() {
        let tag = CryptoError::integrity_failure(
            "decrypt_document",
            "tag mismatch",
            error_codes::AEAD_TAG_MISMATCH,
        );
        let sig = CryptoError::unauthorized(
            "certificate_check",
            "no live certificate",
            error_codes::CERTIFICATE_UNTRUSTED,
        );
        assert_eq!(tag.public_message(), GENERIC_FAILURE_MESSAGE);
        assert_eq!(sig.public_message(), GENERIC_FAILURE_MESSAGE);
        assert!(!tag.public_message().contains("tag"));

        // Distinguishable internally
        assert_ne!(tag.error_type(), sig.error_type());
    }

    #[test]
    fn test_only_timeout_is_transient() {
        assert!(CryptoError::timeout("sign", 100).is_transient());
        assert!(!CryptoError::ChannelFailure.is_transient());
        assert!(!CryptoError::invalid_input("owner_id", "empty", error_codes::INVALID_OWNER_ID)
            .is_transient());
    }

    #[test]
    fn test_technical_details() {
        let error = CryptoError::key_management_error("put", "disk full", "alice");
        let details = error.technical_details();
        assert!(details.contains_key("error_code"));
        assert_eq!(details.get("owner_id").map(String::as_str), Some("alice"));
        assert_eq!(details.get("cause").map(String::as_str), Some("disk full"));
    }
}
