//! Group key distribution.
//!
//! The admin generates a random 256-bit group key and wraps it separately for
//! every other member: encapsulate against the member's public key, derive a
//! wrapping key from the shared secret, seal the group key under it. The
//! relay forwards each wrapped copy to exactly one member.
//!
//! ```text
//! admin                                   member
//!   │ key = random(32)                       │
//!   │ (ct, ss) = Encaps(pk_member)           │
//!   │ wk = HKDF(ss, "kemlink group wrap v1") │
//!   │ env = Seal(wk, key)                    │
//!   │ ─────── ct || CBOR(env) ─────────────► │
//!   │                                        │ ss = Decaps(ct, sk)
//!   │                                        │ key = Open(HKDF(ss), env)
//! ```
//!
//! Distribution is best effort per member: one member's failure is logged and
//! reported but does not stop the others.

use std::sync::Arc;

use kemlink_core::{Environment, GroupInfo, Transport};
use kemlink_crypto::{Kem, SymmetricKey, derive_wrapping_key};
use kemlink_proto::{GroupId, GroupKeyMaterial, GroupMessage, MessageContent, Payload, PeerName};
use zeroize::Zeroizing;

use crate::{
    codec::MessageCodec,
    error::{ClientError, HandshakePhase},
    group_store::{Group, GroupRole, GroupSessionStore, InstallOutcome},
    identity::IdentityStore,
};

/// Outcome of fanning a group key out to members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
    /// Group the key belongs to
    pub group_id: GroupId,
    /// Members the wrapped key was handed to the relay for
    pub delivered: Vec<PeerName>,
    /// Members that were skipped, with the reason
    pub failed: Vec<(PeerName, ClientError)>,
}

impl DistributionReport {
    fn new(group_id: GroupId) -> Self {
        Self { group_id, delivered: Vec::new(), failed: Vec::new() }
    }

    /// Names of the members that were skipped.
    pub fn failed_members(&self) -> Vec<PeerName> {
        self.failed.iter().map(|(peer, _)| peer.clone()).collect()
    }

    /// Whether every member was served.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates groups, wraps and unwraps group keys, and carries group traffic.
pub struct GroupKeyDistributor<E: Environment> {
    env: E,
    me: PeerName,
    kem: Arc<dyn Kem>,
    transport: Arc<dyn Transport>,
    identity: Arc<IdentityStore>,
    groups: Arc<GroupSessionStore<E::Instant>>,
    codec: MessageCodec<E>,
}

impl<E: Environment> GroupKeyDistributor<E> {
    /// Create a distributor acting as `me`.
    pub fn new(
        env: E,
        me: PeerName,
        kem: Arc<dyn Kem>,
        transport: Arc<dyn Transport>,
        identity: Arc<IdentityStore>,
        groups: Arc<GroupSessionStore<E::Instant>>,
    ) -> Self {
        let codec = MessageCodec::new(env.clone());
        Self { env, me, kem, transport, identity, groups, codec }
    }

    /// Create a group with us as admin and distribute a fresh key.
    ///
    /// Every member other than us must have a cached public key; otherwise
    /// nothing is sent to the relay.
    ///
    /// # Errors
    ///
    /// - `MissingPublicKey` naming every member without a key
    /// - `Transport` if the relay refuses the group
    pub async fn create_group(
        &self,
        name: &str,
        members: &[PeerName],
    ) -> Result<DistributionReport, ClientError> {
        let mut missing: Vec<_> = members
            .iter()
            .filter(|m| **m != self.me && !self.identity.has_peer_key(m))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(ClientError::MissingPublicKey { members: missing });
        }

        let info = self.transport.create_group(name, members).await?;
        tracing::info!(group_id = %info.group_id, %name, members = info.members.len(), "group created");
        self.on_group_created(&info).await
    }

    /// Relay confirmed a group we created: generate, install and distribute
    /// its key.
    ///
    /// A confirmation for a group we already track is a no-op and yields an
    /// empty report.
    ///
    /// # Errors
    ///
    /// - `NotGroupAdmin` if the group names someone else as admin
    pub async fn on_group_created(&self, info: &GroupInfo) -> Result<DistributionReport, ClientError> {
        if info.admin != self.me {
            return Err(ClientError::NotGroupAdmin { group_id: info.group_id.clone() });
        }

        let key = SymmetricKey::from_bytes(self.env.random_array());
        let mut group = Group::new(
            info.group_id.clone(),
            info.name.clone(),
            info.admin.clone(),
            info.members.iter().cloned(),
            GroupRole::Admin,
            self.env.now(),
        );
        group.key = Some(key.clone());

        if !self.groups.insert(group) {
            tracing::debug!(group_id = %info.group_id, "group already known");
            return Ok(DistributionReport::new(info.group_id.clone()));
        }

        Ok(self.distribute(&info.group_id, &key, &info.members).await)
    }

    /// We were invited to a group, or its membership changed. Returns whether
    /// the group is new to us.
    pub fn on_group_invitation(&self, info: &GroupInfo) -> Result<bool, ClientError> {
        if self.groups.contains(&info.group_id) {
            self.groups.set_members(&info.group_id, info.members.iter().cloned())?;
            return Ok(false);
        }

        let role = if info.admin == self.me { GroupRole::Admin } else { GroupRole::Member };
        let inserted = self.groups.insert(Group::new(
            info.group_id.clone(),
            info.name.clone(),
            info.admin.clone(),
            info.members.iter().cloned(),
            role,
            self.env.now(),
        ));
        if inserted {
            tracing::info!(group_id = %info.group_id, name = %info.name, admin = %info.admin, "joined group");
        }
        Ok(inserted)
    }

    /// Unwrap and install a group key sent by the admin.
    ///
    /// Returns the group id when the key was installed, `None` when a key was
    /// already present and the material was discarded.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if we were never invited
    /// - `GroupKeyDecryptionFailed` if the sender is not the admin or any
    ///   unwrapping step fails; the group stays keyless
    pub fn on_group_key_material(
        &self,
        from: &PeerName,
        material: &GroupKeyMaterial,
    ) -> Result<Option<GroupId>, ClientError> {
        let group_id = &material.group_id;
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| ClientError::UnknownGroup { group_id: group_id.clone() })?;

        let unwrap_failed =
            |reason: String| ClientError::GroupKeyDecryptionFailed { group_id: group_id.clone(), reason };

        if group.admin != *from {
            tracing::warn!(%group_id, %from, admin = %group.admin, "group key material from non-admin");
            return Err(unwrap_failed(format!("sent by {from}, admin is {}", group.admin)));
        }

        if group.key.is_some() {
            tracing::debug!(%group_id, "duplicate group key material discarded");
            return Ok(None);
        }

        let (kem_ciphertext, wrapped) =
            material.split(self.kem.ciphertext_len()).map_err(|e| unwrap_failed(e.to_string()))?;
        let secret = self
            .kem
            .decapsulate(kem_ciphertext, self.identity.private_key())
            .map_err(|e| unwrap_failed(e.to_string()))?;
        let wrapping_key = derive_wrapping_key(&secret);

        let key_bytes = Zeroizing::new(
            self.codec.decode(&wrapping_key, &wrapped).map_err(|e| unwrap_failed(e.to_string()))?,
        );
        let key = SymmetricKey::try_from_slice(&key_bytes).map_err(|e| unwrap_failed(e.to_string()))?;

        match self.groups.install_key(group_id, key)? {
            InstallOutcome::Installed => {
                tracing::info!(%group_id, "group key installed");
                Ok(Some(group_id.clone()))
            },
            InstallOutcome::Duplicate | InstallOutcome::Conflict => Ok(None),
        }
    }

    /// Seal `content` under the group key and hand it to the relay for
    /// fan-out.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup`, or `GroupKeyNotReady` before the key is installed
    pub async fn send_group_message(
        &self,
        group_id: &GroupId,
        content: &MessageContent,
    ) -> Result<(), ClientError> {
        let key = self.groups.key(group_id)?;
        let envelope = self.codec.seal_content(&key, content)?;
        let payload = Payload::GroupMessage(GroupMessage { group_id: group_id.clone(), envelope }).encode()?;

        self.transport.send_group_message(group_id, payload).await?;
        tracing::debug!(%group_id, "group message sent");
        Ok(())
    }

    /// Decrypt a group message.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` or `GroupKeyNotReady`
    /// - `DecryptionFailed` on tag mismatch
    pub fn on_group_message(
        &self,
        from: &PeerName,
        message: &GroupMessage,
    ) -> Result<MessageContent, ClientError> {
        let key = self.groups.key(&message.group_id)?;
        self.codec.open_content(
            &key,
            &message.envelope,
            format!("group {} message from {from}", message.group_id),
        )
    }

    /// Add `member` to a group we administer and send them the current key.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup`, `NotGroupAdmin` or `GroupKeyNotReady`
    /// - `MissingPublicKey` if we have no key for `member`
    /// - `Transport` if the relay refuses the addition
    pub async fn add_member(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<DistributionReport, ClientError> {
        let key = self.admin_key(group_id)?;
        if !self.identity.has_peer_key(member) {
            return Err(ClientError::MissingPublicKey { members: vec![member.clone()] });
        }

        self.transport.add_group_member(group_id, member).await?;
        self.groups.add_member(group_id, member.clone())?;
        tracing::info!(%group_id, %member, "member added");

        Ok(self.distribute(group_id, &key, std::slice::from_ref(member)).await)
    }

    /// Wrap and send the current key to one member again, e.g. after a
    /// partial distribution.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup`, `NotGroupAdmin` or `GroupKeyNotReady`
    pub async fn redistribute(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<DistributionReport, ClientError> {
        let key = self.admin_key(group_id)?;
        Ok(self.distribute(group_id, &key, std::slice::from_ref(member)).await)
    }

    fn admin_key(&self, group_id: &GroupId) -> Result<SymmetricKey, ClientError> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| ClientError::UnknownGroup { group_id: group_id.clone() })?;
        if group.admin != self.me {
            return Err(ClientError::NotGroupAdmin { group_id: group_id.clone() });
        }
        group.key.ok_or_else(|| ClientError::GroupKeyNotReady { group_id: group_id.clone() })
    }

    async fn distribute(
        &self,
        group_id: &GroupId,
        key: &SymmetricKey,
        members: &[PeerName],
    ) -> DistributionReport {
        let mut report = DistributionReport::new(group_id.clone());

        for member in members.iter().filter(|m| **m != self.me) {
            let sent = match self.wrap_for(group_id, key, member) {
                Ok(payload) => self
                    .transport
                    .distribute_group_key_material(group_id, member, payload)
                    .await
                    .map_err(ClientError::from),
                Err(e) => Err(e),
            };

            match sent {
                Ok(()) => report.delivered.push(member.clone()),
                Err(e) => {
                    tracing::warn!(%group_id, %member, error = %e, "group key distribution failed");
                    report.failed.push((member.clone(), e));
                },
            }
        }

        tracing::info!(
            %group_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "group key distributed"
        );
        report
    }

    fn wrap_for(
        &self,
        group_id: &GroupId,
        key: &SymmetricKey,
        member: &PeerName,
    ) -> Result<Vec<u8>, ClientError> {
        let public_key = self
            .identity
            .peer_key(member)
            .ok_or_else(|| ClientError::MissingPublicKey { members: vec![member.clone()] })?;

        let (kem_ciphertext, secret) =
            self.kem.encapsulate(&public_key).map_err(|e| ClientError::HandshakeFailed {
                peer: member.clone(),
                phase: HandshakePhase::Encapsulate,
                reason: e.to_string(),
            })?;
        let wrapping_key = derive_wrapping_key(&secret);
        let wrapped = self.codec.encode(&wrapping_key, key.as_bytes());

        let material = GroupKeyMaterial::seal(group_id.clone(), &kem_ciphertext, &wrapped)?;
        Ok(Payload::GroupKeyMaterial(material).encode()?)
    }
}
