//! Client actions.

use kemlink_proto::{GroupId, MessageContent, PeerName};

use crate::{group_store::GroupRole, session_store::HandshakeRole};

/// Actions the client produces for the application after handling a
/// [`kemlink_core::TransportEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Decrypted pairwise message.
    DeliverMessage {
        /// Sender.
        from: PeerName,
        /// Decrypted content.
        content: MessageContent,
    },

    /// Decrypted group message.
    DeliverGroupMessage {
        /// Group the message was sent to.
        group_id: GroupId,
        /// Sender.
        from: PeerName,
        /// Decrypted content.
        content: MessageContent,
    },

    /// A session key was installed for a peer.
    SessionEstablished {
        /// Peer of the new session.
        peer: PeerName,
        /// Our side of the handshake.
        role: HandshakeRole,
    },

    /// We became part of a group.
    GroupJoined {
        /// Group id.
        group_id: GroupId,
        /// Display name.
        name: String,
        /// Our role.
        role: GroupRole,
    },

    /// Admin finished fanning out a group key.
    GroupKeyDistributed {
        /// Group id.
        group_id: GroupId,
        /// Members that were sent their wrapped key.
        delivered: Vec<PeerName>,
        /// Members that were skipped; retry with
        /// [`crate::Client::redistribute_group_key`].
        failed: Vec<PeerName>,
    },

    /// A group key was unwrapped and installed; the group is usable.
    GroupKeyInstalled {
        /// Group id.
        group_id: GroupId,
    },

    /// The set of online peers changed.
    PeersChanged {
        /// Peers currently online, excluding ourselves.
        online: Vec<PeerName>,
    },
}
