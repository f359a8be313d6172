//! Group payload types.
//!
//! A group key never travels in the clear. The admin wraps it once per member
//! and ships `kem_ciphertext || CBOR(Envelope)`; the member splits at the
//! KEM's fixed ciphertext length.

use kemlink_crypto::Envelope;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    ids::GroupId,
};

/// Group key wrapped for exactly one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKeyMaterial {
    /// Group the key belongs to
    pub group_id: GroupId,
    /// `kem_ciphertext || CBOR(Envelope)`
    #[serde(with = "serde_bytes")]
    pub material: Vec<u8>,
}

impl GroupKeyMaterial {
    /// Concatenate a KEM ciphertext and the wrapped key envelope.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if the envelope cannot be serialized
    pub fn seal(group_id: GroupId, kem_ciphertext: &[u8], wrapped: &Envelope) -> Result<Self> {
        let mut material = kem_ciphertext.to_vec();
        ciborium::ser::into_writer(wrapped, &mut material)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self { group_id, material })
    }

    /// Split into `(kem_ciphertext, wrapped_key)`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidLength` if the material is not longer than
    ///   `ciphertext_len`
    /// - `ProtocolError::Decode` if the trailing bytes are not an envelope
    pub fn split(&self, ciphertext_len: usize) -> Result<(&[u8], Envelope)> {
        if self.material.len() <= ciphertext_len {
            return Err(ProtocolError::InvalidLength {
                what: "group key material",
                expected: ciphertext_len + 1,
                actual: self.material.len(),
            });
        }

        let (kem_ciphertext, wrapped) = self.material.split_at(ciphertext_len);
        let envelope = ciborium::de::from_reader(wrapped)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        Ok((kem_ciphertext, envelope))
    }
}

/// Message sealed under a group key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Target group
    pub group_id: GroupId,
    /// Encrypted [`crate::MessageContent`]
    pub envelope: Envelope,
}
