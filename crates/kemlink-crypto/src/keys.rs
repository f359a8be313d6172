//! Key material types.
//!
//! Secret types zeroize on drop, compare in constant time and never print
//! their bytes.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of a symmetric AEAD key (32 bytes).
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of a KEM shared secret (32 bytes).
pub const SHARED_SECRET_SIZE: usize = 32;

/// A 32-byte ChaCha20-Poly1305 key.
///
/// Used both for pairwise sessions and for group keys. Treated as an immutable
/// value: rotating a key means replacing it wholesale.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a slice of exactly [`SYMMETRIC_KEY_SIZE`] bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; SYMMETRIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                what: "symmetric key",
                expected: SYMMETRIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey").field("value", &"***").finish()
    }
}

/// Raw 32-byte output of a KEM encapsulation or decapsulation.
///
/// Never used as a key directly; expand it with
/// [`crate::derive_session_key`] or [`crate::derive_wrapping_key`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Wrap raw shared secret bytes.
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for SharedSecret {}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret").field("value", &"***").finish()
    }
}

/// Encoded KEM public (encapsulation) key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KemPublicKey(Vec<u8>);

impl KemPublicKey {
    /// Wrap encoded public key bytes. Length is checked by the KEM on use.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encoded key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the encoded key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KemPublicKey").field("len", &self.0.len()).finish()
    }
}

/// Encoded KEM private (decapsulation) key. Never leaves its owner.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KemPrivateKey(Vec<u8>);

impl KemPrivateKey {
    /// Wrap encoded private key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encoded key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KemPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KemPrivateKey").field("value", &"***").finish()
    }
}

/// A party's long-term KEM key pair.
#[derive(Debug)]
pub struct KemKeyPair {
    public: KemPublicKey,
    private: KemPrivateKey,
}

impl KemKeyPair {
    /// Assemble a key pair from its halves.
    pub fn new(public: KemPublicKey, private: KemPrivateKey) -> Self {
        Self { public, private }
    }

    /// Public half, safe to publish.
    pub fn public_key(&self) -> &KemPublicKey {
        &self.public
    }

    /// Private half.
    pub fn private_key(&self) -> &KemPrivateKey {
        &self.private
    }
}
