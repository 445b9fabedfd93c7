//! # Error Handling
//!
//! Error types for Sealdrop Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── InvalidKey            - Key has wrong length/format           │
//! │  │   ├── EncryptionFailed      - AEAD sealing failed                   │
//! │  │   ├── DecryptionFailed      - AEAD opening failed (tamper/bad key)  │
//! │  │   ├── KeyDerivationFailed   - HKDF expansion failed                 │
//! │  │   └── UnsupportedEnvelope   - Unknown version/algorithm             │
//! │  │                                                                      │
//! │  ├── Handshake Errors                                                  │
//! │  │   ├── MalformedMessage      - Bad header/intro/line structure       │
//! │  │   └── InvalidNumber         - Numeric field not a non-negative int  │
//! │  │                                                                      │
//! │  └── Tier Errors                                                       │
//! │      └── InvalidTierSchedule   - Ranges unordered or overlapping       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for Sealdrop Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Sealdrop Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Crypto Errors
    // ========================================================================
    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Key derivation failed
    #[error("Failed to derive key: {0}")]
    KeyDerivationFailed(String),

    /// Envelope carries an unknown protocol version or algorithm.
    /// Unknown envelopes fail closed before any decryption is attempted.
    #[error("Unsupported envelope: {0}")]
    UnsupportedEnvelope(String),

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// The handshake message does not match the canonical structure
    #[error("Malformed handshake message: {0}")]
    MalformedMessage(String),

    /// A numeric handshake field does not parse as a non-negative integer
    #[error("Invalid number in field '{field}': {value}")]
    InvalidNumber {
        /// Name of the offending field
        field: String,
        /// The raw value that failed to parse
        value: String,
    },

    // ========================================================================
    // Tier Errors
    // ========================================================================
    /// Tier ranges are unordered, overlapping, or inverted
    #[error("Invalid tier schedule: {0}")]
    InvalidTierSchedule(String),

    // ========================================================================
    // Serialization
    // ========================================================================
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_detail() {
        let err = Error::InvalidNumber {
            field: "Sent-At".to_string(),
            value: "-3".to_string(),
        };
        assert!(err.to_string().contains("Sent-At"));
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let bad: std::result::Result<u64, _> = serde_json::from_str("not json");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
