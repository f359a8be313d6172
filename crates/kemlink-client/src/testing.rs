//! Test doubles: seeded environment, recording transport, counting KEM.

#![allow(clippy::unwrap_used)]

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use kemlink_core::{Environment, GroupInfo, Transport, TransportError};
use kemlink_crypto::{
    CryptoError, Kem, KemKeyPair, KemPrivateKey, KemPublicKey, MlKem512, SharedSecret,
};
use kemlink_proto::{GroupId, PeerName};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub(crate) fn peer(name: &str) -> PeerName {
    PeerName::new(name).unwrap()
}

#[derive(Clone)]
pub(crate) struct TestEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl TestEnv {
    pub(crate) fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Environment for TestEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    ToPeer { peer: PeerName, payload: Vec<u8> },
    KeyRequest { peer: PeerName },
    PublishKey,
    CreateGroup { name: String, members: Vec<PeerName> },
    AddMember { group_id: GroupId, member: PeerName },
    KeyMaterial { group_id: GroupId, member: PeerName, payload: Vec<u8> },
    GroupMessage { group_id: GroupId, payload: Vec<u8> },
}

/// Records every outbound call. Group creation is confirmed synchronously
/// with a fixed id.
pub(crate) struct RecordingTransport {
    me: PeerName,
    sent: Mutex<Vec<Sent>>,
    failing_peers: Mutex<HashSet<PeerName>>,
    reject_key_requests: AtomicBool,
    stall_sends: AtomicBool,
}

pub(crate) const TEST_GROUP_ID: &str = "0123456789abcdef";

impl RecordingTransport {
    pub(crate) fn new(me: &str) -> Arc<Self> {
        Arc::new(Self {
            me: peer(me),
            sent: Mutex::new(Vec::new()),
            failing_peers: Mutex::new(HashSet::new()),
            reject_key_requests: AtomicBool::new(false),
            stall_sends: AtomicBool::new(false),
        })
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub(crate) fn payloads_to(&self, target: &PeerName) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ToPeer { peer, payload } if &peer == target => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn key_material_for(&self, target: &PeerName) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::KeyMaterial { member, payload, .. } if &member == target => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn group_messages(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::GroupMessage { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn fail_sends_to(&self, target: &PeerName) {
        self.failing_peers.lock().unwrap().insert(target.clone());
    }

    pub(crate) fn reject_key_requests(&self) {
        self.reject_key_requests.store(true, Ordering::SeqCst);
    }

    /// Point-to-point sends never complete from now on.
    pub(crate) fn stall_sends(&self) {
        self.stall_sends.store(true, Ordering::SeqCst);
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }

    fn check_target(&self, target: &PeerName) -> Result<(), TransportError> {
        if self.failing_peers.lock().unwrap().contains(target) {
            return Err(TransportError::PeerNotFound { peer: target.clone() });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_to_peer(&self, peer: &PeerName, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.check_target(peer)?;
        self.record(Sent::ToPeer { peer: peer.clone(), payload });
        Ok(())
    }

    async fn request_public_key(&self, peer: &PeerName) -> Result<(), TransportError> {
        if self.reject_key_requests.load(Ordering::SeqCst) {
            return Err(TransportError::NoPublicKey { peer: peer.clone() });
        }
        self.record(Sent::KeyRequest { peer: peer.clone() });
        Ok(())
    }

    async fn publish_public_key(&self, _public_key: &KemPublicKey) -> Result<(), TransportError> {
        self.record(Sent::PublishKey);
        Ok(())
    }

    async fn create_group(
        &self,
        name: &str,
        members: &[PeerName],
    ) -> Result<GroupInfo, TransportError> {
        self.record(Sent::CreateGroup { name: name.to_string(), members: members.to_vec() });

        let mut all = vec![self.me.clone()];
        all.extend(members.iter().filter(|m| **m != self.me).cloned());
        Ok(GroupInfo {
            group_id: GroupId::new(TEST_GROUP_ID).unwrap(),
            name: name.to_string(),
            admin: self.me.clone(),
            members: all,
        })
    }

    async fn add_group_member(
        &self,
        group_id: &GroupId,
        member: &PeerName,
    ) -> Result<GroupInfo, TransportError> {
        self.record(Sent::AddMember { group_id: group_id.clone(), member: member.clone() });
        Ok(GroupInfo {
            group_id: group_id.clone(),
            name: "test".to_string(),
            admin: self.me.clone(),
            members: vec![self.me.clone(), member.clone()],
        })
    }

    async fn distribute_group_key_material(
        &self,
        group_id: &GroupId,
        member: &PeerName,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.check_target(member)?;
        self.record(Sent::KeyMaterial {
            group_id: group_id.clone(),
            member: member.clone(),
            payload,
        });
        Ok(())
    }

    async fn send_group_message(
        &self,
        group_id: &GroupId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.record(Sent::GroupMessage { group_id: group_id.clone(), payload });
        Ok(())
    }
}

/// ML-KEM-512 that counts operations and can be told to fail.
#[derive(Default)]
pub(crate) struct CountingKem {
    inner: MlKem512,
    pub(crate) encapsulations: AtomicUsize,
    pub(crate) decapsulations: AtomicUsize,
    pub(crate) fail_encapsulate: AtomicBool,
    pub(crate) fail_keygen: AtomicBool,
}

impl CountingKem {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn crypto_ops(&self) -> usize {
        self.encapsulations.load(Ordering::SeqCst) + self.decapsulations.load(Ordering::SeqCst)
    }
}

impl Kem for CountingKem {
    fn public_key_len(&self) -> usize {
        self.inner.public_key_len()
    }

    fn ciphertext_len(&self) -> usize {
        self.inner.ciphertext_len()
    }

    fn generate_keypair(&self) -> Result<KemKeyPair, CryptoError> {
        if self.fail_keygen.load(Ordering::SeqCst) {
            return Err(CryptoError::KeyGeneration { reason: "injected failure".to_string() });
        }
        self.inner.generate_keypair()
    }

    fn encapsulate(&self, public_key: &KemPublicKey) -> Result<(Vec<u8>, SharedSecret), CryptoError> {
        self.encapsulations.fetch_add(1, Ordering::SeqCst);
        if self.fail_encapsulate.load(Ordering::SeqCst) {
            return Err(CryptoError::Encapsulation { reason: "injected failure".to_string() });
        }
        self.inner.encapsulate(public_key)
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &KemPrivateKey,
    ) -> Result<SharedSecret, CryptoError> {
        self.decapsulations.fetch_add(1, Ordering::SeqCst);
        self.inner.decapsulate(ciphertext, private_key)
    }
}
