//! Kemlink Wire Protocol
//!
//! Everything that crosses the relay is an opaque byte string. This crate
//! defines what those bytes mean: a one-byte payload kind followed by a CBOR
//! body. The relay never decodes them; only endpoints do.
//!
//! ```text
//! ┌──────┬──────────────────────────────┐
//! │ kind │ CBOR body                    │
//! │ u8   │ (variable, <= 16 MiB)        │
//! └──────┴──────────────────────────────┘
//! ```
//!
//! Identifiers ([`PeerName`], [`GroupId`]) are validated newtypes so that a
//! malformed name from the wire is rejected at decode time rather than deep in
//! protocol logic.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod ids;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use ids::{GroupId, PeerName};
pub use payloads::{
    Payload, PayloadKind,
    content::MessageContent,
    group::{GroupKeyMaterial, GroupMessage},
    handshake::KemCiphertext,
};
