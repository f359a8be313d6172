//! Protocol error types

use thiserror::Error;

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from encoding, decoding or validating wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// CBOR serialization failed
    #[error("CBOR encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid payload (malformed CBOR, unknown kind, empty)
    #[error("decode failed: {0}")]
    Decode(String),

    /// A fixed-size field has the wrong length
    #[error("invalid {what} length: expected at least {expected}, got {actual}")]
    InvalidLength {
        /// Field that was checked
        what: &'static str,
        /// Minimum expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Payload exceeds maximum allowed size
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Peer name or group id failed validation
    #[error("invalid {kind}: {reason}")]
    InvalidIdentifier {
        /// Which identifier type
        kind: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
