//! Client error types.
//!
//! Every failure carries the peer or group it concerns, so a caller can decide
//! whether to retry or alert the user. Nothing cryptographic is ever swallowed
//! into a no-op.

use std::fmt;

use kemlink_core::TransportError;
use kemlink_proto::{GroupId, PeerName, ProtocolError};
use thiserror::Error;

/// Step of a handshake at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Initiator: encapsulating against the peer's public key
    Encapsulate,
    /// Initiator: handing the ciphertext to the transport
    Send,
    /// Responder: decapsulating the received ciphertext
    Decapsulate,
    /// A coalesced attempt ended without producing a result
    Cancelled,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Encapsulate => "encapsulate",
            Self::Send => "send",
            Self::Decapsulate => "decapsulate",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Errors from client operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Identity key pair could not be generated. Fatal.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Reason reported by the KEM
        reason: String,
    },

    /// Peer's public key could not be obtained in time
    #[error("peer {peer} unavailable: {reason}")]
    PeerUnavailable {
        /// Peer we tried to reach
        peer: PeerName,
        /// Timeout or relay refusal
        reason: String,
    },

    /// Handshake failed; no session was installed
    #[error("handshake with {peer} failed during {phase}: {reason}")]
    HandshakeFailed {
        /// Peer of the handshake
        peer: PeerName,
        /// Step that failed
        phase: HandshakePhase,
        /// Underlying cause
        reason: String,
    },

    /// Encrypted message from a peer we have no session with
    #[error("no session with {peer}")]
    NoSession {
        /// Sender of the message
        peer: PeerName,
    },

    /// Authentication tag mismatch: tampering or wrong key. Never retried.
    #[error("decryption failed: {context}")]
    DecryptionFailed {
        /// What was being decrypted
        context: String,
    },

    /// Group creation blocked: these members have no cached public key
    #[error("missing public key for {}", join(.members))]
    MissingPublicKey {
        /// Offending members
        members: Vec<PeerName>,
    },

    /// Received group key could not be unwrapped; the group stays keyless
    #[error("group key for {group_id} could not be decrypted: {reason}")]
    GroupKeyDecryptionFailed {
        /// Affected group
        group_id: GroupId,
        /// Underlying cause
        reason: String,
    },

    /// Group key has not been installed yet
    #[error("group {group_id} has no key yet")]
    GroupKeyNotReady {
        /// Affected group
        group_id: GroupId,
    },

    /// Group is not known locally
    #[error("unknown group: {group_id}")]
    UnknownGroup {
        /// Requested group
        group_id: GroupId,
    },

    /// Operation requires the group admin role
    #[error("not admin of group {group_id}")]
    NotGroupAdmin {
        /// Affected group
        group_id: GroupId,
    },

    /// Relay failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed wire data
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

fn join(members: &[PeerName]) -> String {
    members.iter().map(PeerName::as_str).collect::<Vec<_>>().join(", ")
}

impl ClientError {
    /// Returns true if repeating the operation may succeed.
    ///
    /// Decryption failures signal tampering or a wrong key and are never
    /// retryable. Usage errors need the caller to change something first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PeerUnavailable { .. }
            | Self::HandshakeFailed { .. }
            | Self::GroupKeyDecryptionFailed { .. } => true,
            Self::Transport(e) => e.is_transient(),
            Self::KeyGeneration { .. }
            | Self::NoSession { .. }
            | Self::DecryptionFailed { .. }
            | Self::MissingPublicKey { .. }
            | Self::GroupKeyNotReady { .. }
            | Self::UnknownGroup { .. }
            | Self::NotGroupAdmin { .. }
            | Self::Protocol(_) => false,
        }
    }

    /// Returns true if the client cannot continue at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KeyGeneration { .. })
    }
}
