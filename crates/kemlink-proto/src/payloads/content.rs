//! Plaintext message content, the bytes sealed inside an envelope.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// What a user actually sent.
///
/// Encoded as an externally tagged CBOR map (`{"text": {...}}`), so the kind
/// is always explicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    /// UTF-8 text
    Text {
        /// Message body
        body: String,
    },
    /// Opaque image bytes; rendering is the application's concern
    Image {
        /// MIME type, e.g. `image/png`
        mime_type: String,
        /// Raw image bytes
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl MessageContent {
    /// Text message shorthand.
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Serialize to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
