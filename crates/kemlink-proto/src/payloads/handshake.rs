//! Handshake payload types.

use serde::{Deserialize, Serialize};

/// KEM ciphertext sent by the initiator of a pairwise handshake.
///
/// # Protocol Flow
///
/// 1. Initiator encapsulates against the responder's public key
/// 2. Initiator installs the derived session key and sends this payload
/// 3. Responder decapsulates and installs the same key; no reply is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemCiphertext {
    /// Raw KEM ciphertext (768 bytes for ML-KEM-512)
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}
