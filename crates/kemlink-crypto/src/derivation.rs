//! Key derivation from KEM shared secrets using HKDF

use hkdf::Hkdf;
use sha2::Sha256;

use crate::keys::{SYMMETRIC_KEY_SIZE, SharedSecret, SymmetricKey};

/// Info label for pairwise session keys
pub const SESSION_KEY_LABEL: &[u8] = b"kemlink session v1";

/// Info label for per-member group key wrapping keys
pub const GROUP_WRAP_LABEL: &[u8] = b"kemlink group wrap v1";

/// Derive the pairwise AEAD session key from a handshake shared secret.
///
/// # Security
///
/// - No salt and no party-dependent input: initiator and responder hold the
///   same shared secret and must arrive at the same key
/// - Deterministic: same inputs always produce same output
pub fn derive_session_key(secret: &SharedSecret) -> SymmetricKey {
    expand(secret, SESSION_KEY_LABEL)
}

/// Derive the key that wraps a group key for a single member.
///
/// Uses a label distinct from [`SESSION_KEY_LABEL`] so a wrapping key can never
/// collide with a session key, even if a KEM ciphertext were replayed across
/// the two contexts.
pub fn derive_wrapping_key(secret: &SharedSecret) -> SymmetricKey {
    expand(secret, GROUP_WRAP_LABEL)
}

fn expand(secret: &SharedSecret, label: &[u8]) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());

    let mut okm = [0u8; SYMMETRIC_KEY_SIZE];
    let Ok(()) = hkdf.expand(label, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SymmetricKey::from_bytes(okm)
}
