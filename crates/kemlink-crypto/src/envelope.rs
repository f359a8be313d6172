//! Message encryption using ChaCha20-Poly1305
//!
//! All functions are pure: the nonce must be provided by the caller. This
//! keeps encryption deterministic under test while production callers draw
//! the nonce from a secure random source.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};

use crate::{error::CryptoError, keys::SymmetricKey};

/// ChaCha20-Poly1305 nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// An encrypted payload: the nonce it was sealed with and ciphertext+tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The 12-byte nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including the 16-byte Poly1305 tag
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Encrypt `plaintext` under `key` with the given nonce.
///
/// # Security
///
/// The caller MUST NOT reuse a nonce under the same key. Reuse leaks the XOR
/// of both plaintexts and allows tag forgery.
pub fn seal_envelope(key: &SymmetricKey, nonce: [u8; NONCE_SIZE], plaintext: &[u8]) -> Envelope {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Envelope { nonce, ciphertext }
}

/// Decrypt an envelope.
///
/// # Errors
///
/// - `DecryptionFailed`: authentication tag or key is incorrect (tamper), or
///   the ciphertext is too short to carry a tag
pub fn open_envelope(key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
    if envelope.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("ciphertext shorter than {TAG_SIZE}-byte tag"),
        });
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}
