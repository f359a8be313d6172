//! Client facade.
//!
//! Ties identity, pairwise sessions, groups and the relay together. The
//! application calls the async operations directly and feeds every
//! [`TransportEvent`] it receives into [`Client::handle_event`], which returns
//! the [`ClientAction`]s to surface.
//!
//! The client never holds a lock across an `.await`. Event handling may run
//! concurrently with outbound operations on other tasks.

use std::{
    collections::BTreeSet,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use kemlink_core::{Environment, Transport, TransportEvent};
use kemlink_crypto::{Kem, KemPublicKey, SymmetricKey};
use kemlink_proto::{GroupId, MessageContent, Payload, PayloadKind, PeerName, ProtocolError};

use crate::{
    codec::MessageCodec,
    config::ClientConfig,
    distributor::{DistributionReport, GroupKeyDistributor},
    error::ClientError,
    establisher::SessionEstablisher,
    event::ClientAction,
    group_store::{Group, GroupRole, GroupSessionStore},
    identity::IdentityStore,
    session_store::{HandshakeRole, PeerSession, SessionStore},
};

fn unexpected(kind: PayloadKind, channel: &str) -> ClientError {
    ClientError::Protocol(ProtocolError::Decode(format!("unexpected {kind:?} payload on {channel} channel")))
}

/// A kemlink party.
pub struct Client<E: Environment> {
    name: PeerName,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    identity: Arc<IdentityStore>,
    sessions: Arc<SessionStore<E::Instant>>,
    groups: Arc<GroupSessionStore<E::Instant>>,
    establisher: SessionEstablisher<E>,
    distributor: GroupKeyDistributor<E>,
    codec: MessageCodec<E>,
    online: RwLock<BTreeSet<PeerName>>,
}

impl<E: Environment> Client<E> {
    /// Generate an identity and wire up the stores.
    ///
    /// Does not contact the relay; call [`Client::publish_identity`] once
    /// registered.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if the KEM cannot produce a key pair
    pub fn new(
        name: PeerName,
        env: E,
        kem: Arc<dyn Kem>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let identity = Arc::new(IdentityStore::initialize(kem.as_ref())?);
        let sessions = Arc::new(SessionStore::new());
        let groups = Arc::new(GroupSessionStore::new());

        let establisher = SessionEstablisher::new(
            env.clone(),
            Arc::clone(&kem),
            Arc::clone(&transport),
            Arc::clone(&identity),
            Arc::clone(&sessions),
            config.clone(),
        );
        let distributor = GroupKeyDistributor::new(
            env.clone(),
            name.clone(),
            kem,
            Arc::clone(&transport),
            Arc::clone(&identity),
            Arc::clone(&groups),
        );

        tracing::debug!(%name, "identity generated");

        Ok(Self {
            name,
            config,
            transport,
            identity,
            sessions,
            groups,
            establisher,
            distributor,
            codec: MessageCodec::new(env),
            online: RwLock::new(BTreeSet::new()),
        })
    }

    /// Our name on the relay.
    pub fn name(&self) -> &PeerName {
        &self.name
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Our public key.
    pub fn public_key(&self) -> &KemPublicKey {
        self.identity.public_key()
    }

    /// Publish our public key to the relay.
    pub async fn publish_identity(&self) -> Result<(), ClientError> {
        self.transport.publish_public_key(self.identity.public_key()).await?;
        tracing::info!(name = %self.name, "public key published");
        Ok(())
    }

    /// Establish a session with `peer` using the configured timeout.
    pub async fn establish(&self, peer: &PeerName) -> Result<(), ClientError> {
        self.establisher.establish(peer, None).await.map(drop)
    }

    /// Establish a session with `peer`, waiting at most `timeout`.
    pub async fn establish_with_timeout(
        &self,
        peer: &PeerName,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.establisher.establish(peer, Some(timeout)).await.map(drop)
    }

    /// Whether a session with `peer` is installed.
    pub fn has_session(&self, peer: &PeerName) -> bool {
        self.sessions.has(peer)
    }

    /// Session record for `peer`.
    pub fn session(&self, peer: &PeerName) -> Option<PeerSession<E::Instant>> {
        self.sessions.session(peer)
    }

    /// Session key for `peer`.
    pub fn session_key(&self, peer: &PeerName) -> Option<SymmetricKey> {
        self.sessions.get(peer)
    }

    /// Drop the session with `peer`; the next send handshakes again.
    pub fn reset_session(&self, peer: &PeerName) -> bool {
        let removed = self.sessions.remove(peer);
        if removed {
            tracing::info!(%peer, "session reset");
        }
        removed
    }

    /// Encrypt and send `content` to `peer`, establishing a session first if
    /// there is none.
    pub async fn send_message(
        &self,
        peer: &PeerName,
        content: &MessageContent,
    ) -> Result<(), ClientError> {
        let key = match self.sessions.get(peer) {
            Some(key) => key,
            None => self.establisher.establish(peer, None).await?,
        };

        let envelope = self.codec.seal_content(&key, content)?;
        let payload = Payload::Message(envelope).encode()?;
        self.transport.send_to_peer(peer, payload).await?;
        tracing::debug!(%peer, "message sent");
        Ok(())
    }

    /// Create a group with us as admin and distribute its key.
    pub async fn create_group(
        &self,
        name: &str,
        members: &[PeerName],
    ) -> Result<DistributionReport, ClientError> {
        self.distributor.create_group(name, members).await
    }

    /// Add `member` to a group we administer.
    pub async fn add_group_member(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<DistributionReport, ClientError> {
        self.distributor.add_member(group_id, member).await
    }

    /// Send the current group key to `member` again.
    pub async fn redistribute_group_key(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<DistributionReport, ClientError> {
        self.distributor.redistribute(group_id, member).await
    }

    /// Send `content` to every member of a group.
    pub async fn send_group_message(
        &self,
        group_id: &GroupId,
        content: &MessageContent,
    ) -> Result<(), ClientError> {
        self.distributor.send_group_message(group_id, content).await
    }

    /// Snapshot of a group.
    pub fn group(&self, group_id: &GroupId) -> Option<Group<E::Instant>> {
        self.groups.get(group_id)
    }

    /// Groups we belong to.
    pub fn groups(&self) -> Vec<GroupId> {
        self.groups.ids()
    }

    /// Peers the relay last reported online, excluding ourselves.
    pub fn online_peers(&self) -> Vec<PeerName> {
        let online = self.online.read().unwrap_or_else(PoisonError::into_inner);
        online.iter().cloned().collect()
    }

    /// Peers whose public key we hold.
    pub fn known_peers(&self) -> Vec<PeerName> {
        self.identity.known_peers()
    }

    /// Process one relay event.
    ///
    /// # Errors
    ///
    /// Returns the failure of the single event; the client stays usable.
    /// - `NoSession` for an encrypted message from a peer without a session
    /// - `DecryptionFailed` on a tag mismatch
    /// - `HandshakeFailed` or `GroupKeyDecryptionFailed` when unwrapping fails
    /// - `Protocol` for undecodable payloads
    pub async fn handle_event(&self, event: TransportEvent) -> Result<Vec<ClientAction>, ClientError> {
        tracing::trace!(event = event.name(), "handling transport event");

        match event {
            TransportEvent::PeerMessage { from, payload } => self.on_peer_message(from, &payload),

            TransportEvent::PublicKeyResponse { peer, public_key } => {
                if peer != self.name {
                    self.identity.store_peer_key(&peer, public_key);
                }
                Ok(Vec::new())
            },

            TransportEvent::PeerDirectory { keys } => Ok(self.on_peer_directory(keys).await),

            TransportEvent::PeerListChanged { peers } => Ok(self.update_online(|online| {
                *online = peers.into_iter().filter(|p| *p != self.name).collect();
                true
            })),

            TransportEvent::PeerDisconnected { peer } => {
                tracing::debug!(%peer, "peer disconnected");
                Ok(self.update_online(|online| online.remove(&peer)))
            },

            TransportEvent::GroupCreated(info) => {
                if self.groups.contains(&info.group_id) {
                    return Ok(Vec::new());
                }
                let report = self.distributor.on_group_created(&info).await?;
                Ok(vec![
                    ClientAction::GroupJoined {
                        group_id: info.group_id.clone(),
                        name: info.name,
                        role: GroupRole::Admin,
                    },
                    ClientAction::GroupKeyDistributed {
                        group_id: info.group_id,
                        failed: report.failed_members(),
                        delivered: report.delivered,
                    },
                ])
            },

            TransportEvent::GroupInvitation(info) | TransportEvent::GroupUpdated(info) => {
                if !self.distributor.on_group_invitation(&info)? {
                    return Ok(Vec::new());
                }
                let role = if info.admin == self.name { GroupRole::Admin } else { GroupRole::Member };
                Ok(vec![ClientAction::GroupJoined { group_id: info.group_id, name: info.name, role }])
            },

            TransportEvent::GroupKeyMaterial { from, payload } => match Payload::decode(&payload)? {
                Payload::GroupKeyMaterial(material) => {
                    let installed = self.distributor.on_group_key_material(&from, &material)?;
                    Ok(installed
                        .map(|group_id| ClientAction::GroupKeyInstalled { group_id })
                        .into_iter()
                        .collect())
                },
                other => Err(unexpected(other.kind(), "group key")),
            },

            TransportEvent::GroupMessage { from, payload } => match Payload::decode(&payload)? {
                Payload::GroupMessage(message) => {
                    let content = self.distributor.on_group_message(&from, &message)?;
                    Ok(vec![ClientAction::DeliverGroupMessage {
                        group_id: message.group_id,
                        from,
                        content,
                    }])
                },
                other => Err(unexpected(other.kind(), "group message")),
            },
        }
    }

    fn on_peer_message(&self, from: PeerName, payload: &[u8]) -> Result<Vec<ClientAction>, ClientError> {
        match Payload::decode(payload)? {
            Payload::KemCiphertext(handshake) => {
                let installed = self.establisher.on_ciphertext(&from, &handshake.ciphertext)?;
                Ok(installed
                    .map(|_| ClientAction::SessionEstablished { peer: from, role: HandshakeRole::Responder })
                    .into_iter()
                    .collect())
            },
            Payload::Message(envelope) => {
                let key = self.sessions.get(&from).ok_or_else(|| ClientError::NoSession { peer: from.clone() })?;
                let content = self.codec.open_content(&key, &envelope, format!("message from {from}"))?;
                Ok(vec![ClientAction::DeliverMessage { from, content }])
            },
            other => Err(unexpected(other.kind(), "peer")),
        }
    }

    fn update_online(&self, apply: impl FnOnce(&mut BTreeSet<PeerName>) -> bool) -> Vec<ClientAction> {
        let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
        if !apply(&mut online) {
            return Vec::new();
        }
        vec![ClientAction::PeersChanged { online: online.iter().cloned().collect() }]
    }

    async fn on_peer_directory(&self, keys: Vec<(PeerName, KemPublicKey)>) -> Vec<ClientAction> {
        let peers: Vec<_> = keys
            .into_iter()
            .filter(|(peer, _)| *peer != self.name)
            .map(|(peer, key)| {
                self.identity.store_peer_key(&peer, key);
                peer
            })
            .collect();
        tracing::debug!(count = peers.len(), "peer directory received");

        if !self.config.auto_establish {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for peer in peers {
            if self.sessions.has(&peer) {
                continue;
            }
            match self.establisher.establish(&peer, None).await {
                Ok(_) => actions.push(ClientAction::SessionEstablished {
                    peer,
                    role: HandshakeRole::Initiator,
                }),
                Err(e) => tracing::warn!(%peer, error = %e, "automatic session establishment failed"),
            }
        }
        actions
    }
}
