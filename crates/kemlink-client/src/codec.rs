//! Message codec: seals and opens envelopes under a session or group key.
//!
//! Every `encode` draws a fresh 96-bit nonce from the environment. There is no
//! counter; freshness relies on the random source. With `n` messages under one
//! key the collision probability is about `n^2 / 2^97`.

use std::fmt::Display;

use kemlink_core::Environment;
use kemlink_crypto::{CryptoError, Envelope, SymmetricKey, open_envelope, seal_envelope};
use kemlink_proto::MessageContent;

use crate::error::ClientError;

/// Encrypts and decrypts payloads with a caller-chosen key.
#[derive(Clone)]
pub struct MessageCodec<E> {
    env: E,
}

impl<E: Environment> MessageCodec<E> {
    /// Codec drawing nonces from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Seal `plaintext` under `key` with a fresh random nonce.
    pub fn encode(&self, key: &SymmetricKey, plaintext: &[u8]) -> Envelope {
        seal_envelope(key, self.env.random_array(), plaintext)
    }

    /// Open `envelope` with `key`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::DecryptionFailed` on tag mismatch
    pub fn decode(&self, key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        open_envelope(key, envelope)
    }

    /// Serialize and seal message content.
    pub fn seal_content(
        &self,
        key: &SymmetricKey,
        content: &MessageContent,
    ) -> Result<Envelope, ClientError> {
        Ok(self.encode(key, &content.encode()?))
    }

    /// Open and deserialize message content.
    ///
    /// `context` names the message in the error, e.g. its sender.
    pub fn open_content(
        &self,
        key: &SymmetricKey,
        envelope: &Envelope,
        context: impl Display,
    ) -> Result<MessageContent, ClientError> {
        let plaintext = self.decode(key, envelope).map_err(|e| {
            if e.is_tamper_signal() {
                tracing::warn!(%context, "envelope failed authentication");
            }
            ClientError::DecryptionFailed { context: format!("{context}: {e}") }
        })?;
        Ok(MessageContent::decode(&plaintext)?)
    }
}
