//! In-memory relay.
//!
//! Stands in for the untrusted relay server: it registers users under unique
//! names, stores published public keys, forwards opaque payloads, and keeps
//! the group registry. Each registered user gets a [`RelayHandle`]
//! implementing [`Transport`] and an unbounded inbox of [`TransportEvent`]s.
//!
//! Point-to-point payloads for a user who is no longer connected are dropped
//! and logged, like a fire-and-forget socket relay. Group key material for an
//! offline member is reported back as `PeerNotFound` so the admin can
//! redistribute later.
//!
//! The relay state is behind one `Mutex`; inbox sends never block, so no lock
//! is held across an `.await`.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use kemlink_core::{Environment, GroupInfo, Transport, TransportError, TransportEvent};
use kemlink_crypto::KemPublicKey;
use kemlink_proto::{GroupId, PeerName};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::groups::GroupRegistry;

/// Default lifetime of a relay group (24 hours).
pub const DEFAULT_GROUP_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Groups older than this are removed by
    /// [`MemoryRelay::cleanup_expired_groups`]. Serialized as whole seconds.
    #[serde(with = "kemlink_client::duration_secs")]
    pub group_expiration: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { group_expiration: DEFAULT_GROUP_EXPIRATION }
    }
}

/// Receiving side of a user's connection.
pub type Inbox = mpsc::UnboundedReceiver<TransportEvent>;

struct User {
    inbox: mpsc::UnboundedSender<TransportEvent>,
    public_key: Option<KemPublicKey>,
}

struct RelayState<I> {
    users: BTreeMap<PeerName, User>,
    groups: GroupRegistry<I>,
}

impl<I> RelayState<I> {
    /// Push to `user`'s inbox. Returns false if the user is gone.
    fn deliver(&self, user: &PeerName, event: TransportEvent) -> bool {
        self.users.get(user).is_some_and(|u| u.inbox.send(event).is_ok())
    }

    fn broadcast_user_list(&self) {
        let peers: Vec<_> = self.users.keys().cloned().collect();
        tracing::debug!(users = peers.len(), "broadcasting user list");
        for user in self.users.values() {
            let _ = user.inbox.send(TransportEvent::PeerListChanged { peers: peers.clone() });
        }
    }

    fn require_user(&self, user: &PeerName) -> Result<(), TransportError> {
        if self.users.contains_key(user) { Ok(()) } else { Err(TransportError::Closed) }
    }
}

struct Shared<E: Environment> {
    env: E,
    started_at: E::Instant,
    state: Mutex<RelayState<E::Instant>>,
}

/// The relay. Cheap to clone; clones share state.
pub struct MemoryRelay<E: Environment> {
    shared: Arc<Shared<E>>,
}

impl<E: Environment> Clone for MemoryRelay<E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<E: Environment> MemoryRelay<E> {
    /// Empty relay.
    pub fn new(env: E, config: RelayConfig) -> Self {
        let started_at = env.now();
        Self {
            shared: Arc::new(Shared {
                env,
                started_at,
                state: Mutex::new(RelayState {
                    users: BTreeMap::new(),
                    groups: GroupRegistry::new(config.group_expiration),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RelayState<E::Instant>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `name` and return its transport handle and inbox.
    ///
    /// Every connected user, including the new one, receives the updated
    /// user list.
    ///
    /// # Errors
    ///
    /// - `UsernameTaken` if the name is in use
    pub fn register(&self, name: &PeerName) -> Result<(RelayHandle<E>, Inbox), TransportError> {
        let mut state = self.state();
        if state.users.contains_key(name) {
            tracing::warn!(%name, "username already taken");
            return Err(TransportError::UsernameTaken { name: name.clone() });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.users.insert(name.clone(), User { inbox: tx, public_key: None });
        tracing::info!(%name, "user registered");
        state.broadcast_user_list();

        Ok((RelayHandle { me: name.clone(), relay: self.clone() }, rx))
    }

    /// Disconnect `name`. Others receive `PeerDisconnected` and the new user
    /// list. Returns whether the user was connected.
    pub fn disconnect(&self, name: &PeerName) -> bool {
        let mut state = self.state();
        if state.users.remove(name).is_none() {
            return false;
        }

        tracing::info!(%name, "user disconnected");
        for user in state.users.values() {
            let _ = user.inbox.send(TransportEvent::PeerDisconnected { peer: name.clone() });
        }
        state.broadcast_user_list();
        true
    }

    /// Connected users, sorted.
    pub fn users(&self) -> Vec<PeerName> {
        self.state().users.keys().cloned().collect()
    }

    /// Snapshot of a group.
    pub fn group(&self, group_id: &GroupId) -> Option<GroupInfo> {
        self.state().groups.get(group_id).map(|g| g.info())
    }

    /// Groups `user` belongs to.
    pub fn groups_of(&self, user: &PeerName) -> Vec<GroupInfo> {
        self.state().groups.groups_of(user)
    }

    /// Remove `member` from a group. The admin cannot be removed. Remaining
    /// members receive `GroupUpdated`.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if the group does not exist
    pub fn remove_group_member(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<bool, TransportError> {
        let mut state = self.state();
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| TransportError::UnknownGroup { group_id: group_id.clone() })?;

        if !group.remove_member(member) {
            return Ok(false);
        }
        let info = group.info();
        tracing::info!(%group_id, %member, "member removed");

        for user in &info.members {
            state.deliver(user, TransportEvent::GroupUpdated(info.clone()));
        }
        Ok(true)
    }

    /// Drop expired groups. Returns how many were removed.
    pub fn cleanup_expired_groups(&self) -> usize {
        let now = self.shared.env.now();
        let removed = self.state().groups.cleanup_expired(now);
        if removed > 0 {
            tracing::info!(removed, "expired groups removed");
        }
        removed
    }
}

/// One user's connection to a [`MemoryRelay`].
pub struct RelayHandle<E: Environment> {
    me: PeerName,
    relay: MemoryRelay<E>,
}

impl<E: Environment> RelayHandle<E> {
    /// Name this handle is registered under.
    pub fn name(&self) -> &PeerName {
        &self.me
    }
}

#[async_trait]
impl<E: Environment> Transport for RelayHandle<E> {
    async fn send_to_peer(&self, peer: &PeerName, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.relay.state();
        state.require_user(&self.me)?;

        let event = TransportEvent::PeerMessage { from: self.me.clone(), payload };
        if state.deliver(peer, event) {
            tracing::debug!(from = %self.me, to = %peer, "payload forwarded");
        } else {
            tracing::warn!(from = %self.me, to = %peer, "target not connected, payload dropped");
        }
        Ok(())
    }

    async fn request_public_key(&self, peer: &PeerName) -> Result<(), TransportError> {
        let state = self.relay.state();
        state.require_user(&self.me)?;

        let target = state.users.get(peer).ok_or_else(|| {
            tracing::warn!(requester = %self.me, %peer, "public key request for unknown user");
            TransportError::PeerNotFound { peer: peer.clone() }
        })?;
        let public_key = target.public_key.clone().ok_or_else(|| {
            tracing::warn!(requester = %self.me, %peer, "public key request before publication");
            TransportError::NoPublicKey { peer: peer.clone() }
        })?;

        state.deliver(&self.me, TransportEvent::PublicKeyResponse { peer: peer.clone(), public_key });
        Ok(())
    }

    async fn publish_public_key(&self, public_key: &KemPublicKey) -> Result<(), TransportError> {
        let mut state = self.relay.state();
        let user = state.users.get_mut(&self.me).ok_or(TransportError::Closed)?;
        user.public_key = Some(public_key.clone());
        tracing::info!(name = %self.me, "public key published");

        state.broadcast_user_list();

        let keys: Vec<_> = state
            .users
            .iter()
            .filter(|(name, _)| **name != self.me)
            .filter_map(|(name, u)| u.public_key.clone().map(|k| (name.clone(), k)))
            .collect();
        state.deliver(&self.me, TransportEvent::PeerDirectory { keys });
        Ok(())
    }

    async fn create_group(
        &self,
        name: &str,
        members: &[PeerName],
    ) -> Result<GroupInfo, TransportError> {
        let now = self.relay.shared.env.now();
        let created = now - self.relay.shared.started_at;

        let mut state = self.relay.state();
        state.require_user(&self.me)?;

        let info = state.groups.create(name, &self.me, members, now, created).info();
        tracing::info!(group_id = %info.group_id, admin = %self.me, members = info.members.len(), "group created");

        for member in info.members.iter().filter(|m| **m != self.me) {
            if !state.deliver(member, TransportEvent::GroupInvitation(info.clone())) {
                tracing::warn!(group_id = %info.group_id, %member, "invitee not connected");
            }
        }
        Ok(info)
    }

    async fn add_group_member(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<GroupInfo, TransportError> {
        let mut state = self.relay.state();
        state.require_user(&self.me)?;

        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| TransportError::UnknownGroup { group_id: group_id.clone() })?;
        if !group.is_admin(&self.me) {
            return Err(TransportError::Rejected {
                reason: format!("{} is not admin of {group_id}", self.me),
            });
        }

        group.add_member(member.clone());
        let info = group.info();
        tracing::info!(%group_id, %member, "member added");

        state.deliver(member, TransportEvent::GroupInvitation(info.clone()));
        for user in info.members.iter().filter(|m| **m != self.me && *m != member) {
            state.deliver(user, TransportEvent::GroupUpdated(info.clone()));
        }
        Ok(info)
    }

    async fn distribute_group_key_material(
        &self,
        group_id: &GroupId,
        member: &PeerName,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let state = self.relay.state();
        state.require_user(&self.me)?;

        let group = state
            .groups
            .get(group_id)
            .ok_or_else(|| TransportError::UnknownGroup { group_id: group_id.clone() })?;
        if !group.is_member(&self.me) || !group.is_member(member) {
            return Err(TransportError::Rejected {
                reason: format!("{} and {member} must both be members of {group_id}", self.me),
            });
        }

        let event = TransportEvent::GroupKeyMaterial { from: self.me.clone(), payload };
        if !state.deliver(member, event) {
            return Err(TransportError::PeerNotFound { peer: member.clone() });
        }
        tracing::debug!(%group_id, from = %self.me, to = %member, "group key material forwarded");
        Ok(())
    }

    async fn send_group_message(
        &self,
        group_id: &GroupId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let state = self.relay.state();
        state.require_user(&self.me)?;

        let group = state
            .groups
            .get(group_id)
            .ok_or_else(|| TransportError::UnknownGroup { group_id: group_id.clone() })?;
        if !group.is_member(&self.me) {
            return Err(TransportError::Rejected {
                reason: format!("{} is not a member of {group_id}", self.me),
            });
        }

        let mut delivered = 0usize;
        for member in group.members.iter().filter(|m| **m != self.me) {
            let event = TransportEvent::GroupMessage { from: self.me.clone(), payload: payload.clone() };
            if state.deliver(member, event) {
                delivered += 1;
            } else {
                tracing::warn!(%group_id, %member, "member not connected, group message dropped");
            }
        }
        tracing::debug!(%group_id, from = %self.me, delivered, "group message fanned out");
        Ok(())
    }
}
