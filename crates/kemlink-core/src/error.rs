//! Transport error types.

use kemlink_proto::{GroupId, PeerName};
use thiserror::Error;

/// Errors reported by a [`crate::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer is not connected to the relay
    #[error("peer not found: {peer}")]
    PeerNotFound {
        /// Peer that was addressed
        peer: PeerName,
    },

    /// Peer is connected but has not published a public key
    #[error("peer {peer} has no public key")]
    NoPublicKey {
        /// Peer whose key was requested
        peer: PeerName,
    },

    /// Registration under a name that is already in use
    #[error("username taken: {name}")]
    UsernameTaken {
        /// Requested name
        name: PeerName,
    },

    /// Group does not exist on the relay
    #[error("unknown group: {group_id}")]
    UnknownGroup {
        /// Group that was addressed
        group_id: GroupId,
    },

    /// Caller is not allowed to perform the operation
    #[error("rejected: {reason}")]
    Rejected {
        /// Relay's reason
        reason: String,
    },

    /// Connection to the relay is gone
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// A peer that is offline or has not published a key yet may appear
    /// later. Rejections and a closed transport will not fix themselves.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PeerNotFound { .. } | Self::NoPublicKey { .. })
    }
}
