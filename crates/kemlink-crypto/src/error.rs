//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from KEM, AEAD and key handling operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// KEM key pair generation failed
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Reason reported by the KEM
        reason: String,
    },

    /// Encapsulation against a public key failed
    #[error("encapsulation failed: {reason}")]
    Encapsulation {
        /// Reason reported by the KEM
        reason: String,
    },

    /// Decapsulation of a ciphertext failed
    #[error("decapsulation failed: {reason}")]
    Decapsulation {
        /// Reason reported by the KEM
        reason: String,
    },

    /// Decryption failed (authentication tag mismatch)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Key or ciphertext has the wrong size
    #[error("invalid {what} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Kind of material that was checked
        what: &'static str,
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },
}

impl CryptoError {
    /// Returns true if this error signals tampering or a wrong key.
    ///
    /// Such errors must never be retried: the input will not decrypt no
    /// matter how often it is processed.
    pub fn is_tamper_signal(&self) -> bool {
        matches!(self, Self::DecryptionFailed { .. })
    }
}
