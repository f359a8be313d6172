//! Key encapsulation.
//!
//! [`Kem`] is the seam between the protocol and the lattice primitive. The
//! protocol only ever needs three operations and two fixed sizes, so tests can
//! swap in a KEM that counts calls or fails on demand.

use fips203::{
    ml_kem_512,
    traits::{Decaps, Encaps, KeyGen, SerDes},
};

use crate::{
    error::CryptoError,
    keys::{KemKeyPair, KemPrivateKey, KemPublicKey, SharedSecret},
};

/// A key encapsulation mechanism with a single fixed parameter set.
///
/// Object safe so that callers can hold an `Arc<dyn Kem>`.
pub trait Kem: Send + Sync {
    /// Encoded public key length in bytes.
    fn public_key_len(&self) -> usize;

    /// Ciphertext length in bytes. Fixed for the parameter set, which lets
    /// receivers split `ciphertext || payload` without a length prefix.
    fn ciphertext_len(&self) -> usize;

    /// Generate a fresh key pair.
    fn generate_keypair(&self) -> Result<KemKeyPair, CryptoError>;

    /// Encapsulate against `public_key`, returning `(ciphertext, secret)`.
    fn encapsulate(&self, public_key: &KemPublicKey) -> Result<(Vec<u8>, SharedSecret), CryptoError>;

    /// Recover the shared secret from `ciphertext` with `private_key`.
    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &KemPrivateKey,
    ) -> Result<SharedSecret, CryptoError>;
}

/// ML-KEM-512 (FIPS 203, NIST security category 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct MlKem512;

impl MlKem512 {
    /// Encoded encapsulation key length (800 bytes).
    pub const PUBLIC_KEY_LEN: usize = ml_kem_512::EK_LEN;

    /// Ciphertext length (768 bytes).
    pub const CIPHERTEXT_LEN: usize = ml_kem_512::CT_LEN;

    /// Encoded decapsulation key length (1632 bytes).
    pub const PRIVATE_KEY_LEN: usize = ml_kem_512::DK_LEN;
}

fn fixed<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidLength { what, expected: N, actual: bytes.len() })
}

impl Kem for MlKem512 {
    fn public_key_len(&self) -> usize {
        Self::PUBLIC_KEY_LEN
    }

    fn ciphertext_len(&self) -> usize {
        Self::CIPHERTEXT_LEN
    }

    fn generate_keypair(&self) -> Result<KemKeyPair, CryptoError> {
        let (ek, dk) = ml_kem_512::KG::try_keygen()
            .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;

        Ok(KemKeyPair::new(
            KemPublicKey::from_bytes(ek.into_bytes().to_vec()),
            KemPrivateKey::from_bytes(dk.into_bytes().to_vec()),
        ))
    }

    fn encapsulate(&self, public_key: &KemPublicKey) -> Result<(Vec<u8>, SharedSecret), CryptoError> {
        let bytes = fixed::<{ ml_kem_512::EK_LEN }>(public_key.as_bytes(), "public key")?;
        let ek = ml_kem_512::EncapsKey::try_from_bytes(bytes)
            .map_err(|e| CryptoError::Encapsulation { reason: e.to_string() })?;

        let (ssk, ct) =
            ek.try_encaps().map_err(|e| CryptoError::Encapsulation { reason: e.to_string() })?;

        Ok((ct.into_bytes().to_vec(), SharedSecret::from_bytes(ssk.into_bytes())))
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &KemPrivateKey,
    ) -> Result<SharedSecret, CryptoError> {
        let ct_bytes = fixed::<{ ml_kem_512::CT_LEN }>(ciphertext, "ciphertext")?;
        let dk_bytes = fixed::<{ ml_kem_512::DK_LEN }>(private_key.as_bytes(), "private key")?;

        let ct = ml_kem_512::CipherText::try_from_bytes(ct_bytes)
            .map_err(|e| CryptoError::Decapsulation { reason: e.to_string() })?;
        let dk = ml_kem_512::DecapsKey::try_from_bytes(dk_bytes)
            .map_err(|e| CryptoError::Decapsulation { reason: e.to_string() })?;

        let ssk =
            dk.try_decaps(&ct).map_err(|e| CryptoError::Decapsulation { reason: e.to_string() })?;

        Ok(SharedSecret::from_bytes(ssk.into_bytes()))
    }
}
