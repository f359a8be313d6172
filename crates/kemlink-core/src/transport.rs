//! Transport abstraction for the untrusted relay.
//!
//! The relay forwards opaque byte payloads between named peers, answers
//! public-key lookups, and allocates group ids. It is never trusted for
//! correctness: every security-relevant check happens at the endpoints.
//!
//! Outbound operations are methods on [`Transport`]. Inbound notifications
//! arrive as [`TransportEvent`] values that the caller feeds to the client.

use async_trait::async_trait;
use kemlink_crypto::KemPublicKey;
use kemlink_proto::{GroupId, PeerName};

use crate::error::TransportError;

/// Relay's view of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Relay-allocated id
    pub group_id: GroupId,
    /// Display name
    pub name: String,
    /// Creator; always a member
    pub admin: PeerName,
    /// All members including the admin
    pub members: Vec<PeerName>,
}

/// Outbound relay operations.
///
/// Every payload is an opaque, already-encoded byte string. Implementations
/// must be cheap to share (`Arc<dyn Transport>`).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Forward `payload` to `peer`.
    async fn send_to_peer(&self, peer: &PeerName, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Ask the relay for `peer`'s public key.
    ///
    /// The answer arrives later as [`TransportEvent::PublicKeyResponse`].
    /// An error here means the relay refused outright.
    async fn request_public_key(&self, peer: &PeerName) -> Result<(), TransportError>;

    /// Publish our own public key so others can handshake with us.
    async fn publish_public_key(&self, public_key: &KemPublicKey) -> Result<(), TransportError>;

    /// Create a group with us as admin. Resolves once the relay confirms.
    async fn create_group(
        &self,
        name: &str,
        members: &[PeerName],
    ) -> Result<GroupInfo, TransportError>;

    /// Add `member` to a group we administer.
    async fn add_group_member(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<GroupInfo, TransportError>;

    /// Deliver wrapped group key material to a single member.
    async fn distribute_group_key_material(
        &self,
        group_id: &GroupId,
        member: &PeerName,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Fan `payload` out to every other member of the group.
    async fn send_group_message(
        &self,
        group_id: &GroupId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;
}

/// Inbound notifications from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Point-to-point payload (handshake ciphertext or encrypted message)
    PeerMessage {
        /// Sender
        from: PeerName,
        /// Encoded payload
        payload: Vec<u8>,
    },

    /// Answer to [`Transport::request_public_key`]
    PublicKeyResponse {
        /// Whose key
        peer: PeerName,
        /// The key
        public_key: KemPublicKey,
    },

    /// Public keys of every peer, sent once after we publish ours
    PeerDirectory {
        /// `(peer, key)` pairs
        keys: Vec<(PeerName, KemPublicKey)>,
    },

    /// Full list of peers currently online
    PeerListChanged {
        /// Online peers
        peers: Vec<PeerName>,
    },

    /// A peer left the relay
    PeerDisconnected {
        /// Who left
        peer: PeerName,
    },

    /// Relay confirmed a group we created
    GroupCreated(GroupInfo),

    /// We were added to someone else's group
    GroupInvitation(GroupInfo),

    /// Membership of a group we belong to changed
    GroupUpdated(GroupInfo),

    /// Wrapped group key from the group admin
    GroupKeyMaterial {
        /// Sender (should be the admin)
        from: PeerName,
        /// Encoded payload
        payload: Vec<u8>,
    },

    /// Group message from another member
    GroupMessage {
        /// Sender
        from: PeerName,
        /// Encoded payload
        payload: Vec<u8>,
    },
}

impl TransportEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeerMessage { .. } => "peer_message",
            Self::PublicKeyResponse { .. } => "public_key_response",
            Self::PeerDirectory { .. } => "peer_directory",
            Self::PeerListChanged { .. } => "peer_list_changed",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::GroupCreated(_) => "group_created",
            Self::GroupInvitation(_) => "group_invitation",
            Self::GroupUpdated(_) => "group_updated",
            Self::GroupKeyMaterial { .. } => "group_key_material",
            Self::GroupMessage { .. } => "group_message",
        }
    }
}
