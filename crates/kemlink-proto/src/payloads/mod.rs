//! CBOR-encoded point-to-point payloads.
//!
//! A payload is a single [`PayloadKind`] byte followed by the CBOR encoding of
//! the variant's inner struct. The kind byte is the explicit discriminant:
//! receivers dispatch on it and never guess the message type by probing which
//! fields happen to parse.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one kind (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

pub mod content;
pub mod group;
pub mod handshake;

use kemlink_crypto::Envelope;

use crate::errors::{ProtocolError, Result};

/// Maximum encoded payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Payload discriminant, the first byte of every encoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// Handshake KEM ciphertext
    KemCiphertext = 0x01,
    /// Pairwise encrypted message
    Message = 0x02,
    /// Wrapped group key for one member
    GroupKeyMaterial = 0x03,
    /// Group-key encrypted message
    GroupMessage = 0x04,
}

impl PayloadKind {
    /// Convert from the wire byte. Unknown values return `None`.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::KemCiphertext),
            0x02 => Some(Self::Message),
            0x03 => Some(Self::GroupKeyMaterial),
            0x04 => Some(Self::GroupMessage),
            _ => None,
        }
    }

    /// Wire byte for this kind.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// All payloads exchanged between peers through the relay.
///
/// # Security
///
/// - Fail on Unknown Kinds: an unknown discriminant is rejected rather than
///   skipped, so an old client never misreads a newer payload.
/// - Size Validation First: the size check runs before CBOR parsing begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Handshake initiation: the KEM ciphertext for the recipient
    KemCiphertext(handshake::KemCiphertext),
    /// Message sealed under the pairwise session key
    Message(Envelope),
    /// Group key wrapped for a single member
    GroupKeyMaterial(group::GroupKeyMaterial),
    /// Message sealed under a group key
    GroupMessage(group::GroupMessage),
}

impl Payload {
    /// Kind corresponding to this payload.
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::KemCiphertext(_) => PayloadKind::KemCiphertext,
            Self::Message(_) => PayloadKind::Message,
            Self::GroupKeyMaterial(_) => PayloadKind::GroupKeyMaterial,
            Self::GroupMessage(_) => PayloadKind::GroupMessage,
        }
    }

    /// Encode to `kind || CBOR(inner)`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the result exceeds
    ///   [`MAX_PAYLOAD_SIZE`]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.kind().to_u8()];

        match self {
            Self::KemCiphertext(inner) => ciborium::ser::into_writer(inner, &mut buf),
            Self::Message(inner) => ciborium::ser::into_writer(inner, &mut buf),
            Self::GroupKeyMaterial(inner) => ciborium::ser::into_writer(inner, &mut buf),
            Self::GroupMessage(inner) => ciborium::ser::into_writer(inner, &mut buf),
        }
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        if buf.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: buf.len(), max: MAX_PAYLOAD_SIZE });
        }

        Ok(buf)
    }

    /// Decode from `kind || CBOR(inner)`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed [`MAX_PAYLOAD_SIZE`]
    /// - `ProtocolError::Decode` if the input is empty, the kind is unknown or
    ///   CBOR deserialization fails
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
        }

        let Some((&kind_byte, body)) = bytes.split_first() else {
            return Err(ProtocolError::Decode("empty payload".to_string()));
        };

        let kind = PayloadKind::from_u8(kind_byte)
            .ok_or_else(|| ProtocolError::Decode(format!("unknown payload kind: {kind_byte:#04x}")))?;

        let payload = match kind {
            PayloadKind::KemCiphertext => Self::KemCiphertext(from_cbor(body)?),
            PayloadKind::Message => Self::Message(from_cbor(body)?),
            PayloadKind::GroupKeyMaterial => Self::GroupKeyMaterial(from_cbor(body)?),
            PayloadKind::GroupMessage => Self::GroupMessage(from_cbor(body)?),
        };

        Ok(payload)
    }
}

fn from_cbor<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::de::from_reader(body).map_err(|e| ProtocolError::Decode(e.to_string()))
}
