//! Kemlink Cryptographic Primitives
//!
//! Cryptographic building blocks for kemlink. Everything here is a pure
//! function over its inputs except KEM key generation and encapsulation, which
//! draw randomness internally. Callers provide nonces and group keys so that
//! tests can run with a seeded source of randomness.
//!
//! # Key Lifecycle
//!
//! A pairwise session key comes out of a single ML-KEM encapsulation. The
//! initiator encapsulates against the peer's public key, the responder
//! decapsulates the ciphertext with its private key, and both expand the same
//! 32-byte shared secret into an AEAD key with HKDF.
//!
//! ```text
//! Peer public key ──► encapsulate ──► (KEM ciphertext, shared secret)
//!                                              │
//!                                              ▼
//!                           HKDF(label) → Session key / Wrapping key
//!                                              │
//!                                              ▼
//!                          ChaCha20-Poly1305 → Envelope {nonce, ciphertext}
//! ```
//!
//! Group keys are random 32-byte keys that travel wrapped under a per-member
//! wrapping key, derived from a fresh encapsulation towards that member.
//!
//! # Security
//!
//! Confidentiality and integrity:
//! - ChaCha20-Poly1305 provides tamper-proof encryption
//! - Failed authentication tag -> [`CryptoError::DecryptionFailed`], never
//!   partial plaintext
//!
//! Nonces:
//! - Every envelope uses a fresh 96-bit random nonce supplied by the caller
//! - With random nonces the collision probability after `n` messages under a
//!   single key is about `n^2 / 2^97`, i.e. below `2^-33` after `2^32`
//!   messages
//!
//! Key hygiene:
//! - Symmetric keys, shared secrets and KEM private keys are zeroized on drop
//! - `Debug` never prints key material
//! - Key equality is constant-time
//!
//! Not provided: authentication of public keys, replay protection, forward
//! secrecy beyond a single encapsulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod derivation;
mod envelope;
mod error;
mod kem;
mod keys;

pub use derivation::{GROUP_WRAP_LABEL, SESSION_KEY_LABEL, derive_session_key, derive_wrapping_key};
pub use envelope::{Envelope, NONCE_SIZE, TAG_SIZE, open_envelope, seal_envelope};
pub use error::CryptoError;
pub use kem::{Kem, MlKem512};
pub use keys::{
    KemKeyPair, KemPrivateKey, KemPublicKey, SHARED_SECRET_SIZE, SYMMETRIC_KEY_SIZE, SharedSecret,
    SymmetricKey,
};
