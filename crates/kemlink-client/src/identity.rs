//! Identity and peer public key cache.
//!
//! Owns this party's long-term KEM key pair and the public keys of every peer
//! we have heard about. The cache is written by the event handler and read by
//! handshake logic concurrently.
//!
//! Each peer entry is a `watch` channel. A handshake that needs a key it does
//! not have yet subscribes and waits with a deadline. The last waiter to give
//! up on a peer that never published a key removes the empty entry.
//!
//! # Security
//!
//! Peer keys are not authenticated. A newer key for the same peer replaces the
//! older one (most recent wins) and is logged at `warn`.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use kemlink_crypto::{Kem, KemKeyPair, KemPrivateKey, KemPublicKey};
use kemlink_proto::PeerName;
use tokio::sync::watch;

use crate::error::ClientError;

type KeySlot = watch::Sender<Option<KemPublicKey>>;

/// Own key pair plus cached peer public keys.
pub struct IdentityStore {
    keypair: KemKeyPair,
    peers: RwLock<HashMap<PeerName, KeySlot>>,
}

impl IdentityStore {
    /// Generate a fresh identity.
    ///
    /// # Errors
    ///
    /// - `ClientError::KeyGeneration` if the KEM fails. Fatal: without an
    ///   identity no session can ever be established.
    pub fn initialize(kem: &dyn Kem) -> Result<Self, ClientError> {
        let keypair = kem
            .generate_keypair()
            .map_err(|e| ClientError::KeyGeneration { reason: e.to_string() })?;

        Ok(Self { keypair, peers: RwLock::new(HashMap::new()) })
    }

    /// Our public key.
    pub fn public_key(&self) -> &KemPublicKey {
        self.keypair.public_key()
    }

    /// Our private key. Read-only; never leaves this process.
    pub(crate) fn private_key(&self) -> &KemPrivateKey {
        self.keypair.private_key()
    }

    /// Cache `public_key` for `peer`, replacing any previous entry.
    ///
    /// Returns `true` if a different key was replaced.
    pub fn store_peer_key(&self, peer: &PeerName, public_key: KemPublicKey) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let slot = peers.entry(peer.clone()).or_insert_with(|| watch::channel(None).0);

        let replaced = slot.borrow().as_ref().is_some_and(|old| *old != public_key);
        slot.send_replace(Some(public_key));
        if replaced {
            tracing::warn!(%peer, "peer public key replaced");
        }
        replaced
    }

    /// Whether a key is cached for `peer`.
    pub fn has_peer_key(&self, peer: &PeerName) -> bool {
        self.peer_key(peer).is_some()
    }

    /// Cached key for `peer`.
    pub fn peer_key(&self, peer: &PeerName) -> Option<KemPublicKey> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.get(peer).and_then(|slot| slot.borrow().clone())
    }

    /// Peers with a cached key, sorted.
    pub fn known_peers(&self) -> Vec<PeerName> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut known: Vec<_> = peers
            .iter()
            .filter(|(_, slot)| slot.borrow().is_some())
            .map(|(peer, _)| peer.clone())
            .collect();
        known.sort();
        known
    }

    /// Wait up to `timeout` for a key for `peer` to be cached.
    ///
    /// Returns immediately if the key is already present. `None` on timeout.
    pub async fn wait_for_peer_key(
        &self,
        peer: &PeerName,
        timeout: Duration,
    ) -> Option<KemPublicKey> {
        let mut rx = {
            let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            peers.entry(peer.clone()).or_insert_with(|| watch::channel(None).0).subscribe()
        };

        let found = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(key)) => key.clone(),
            Ok(Err(_)) | Err(_) => None,
        };
        drop(rx);

        if found.is_none() {
            self.release_empty_slot(peer);
        }
        found
    }

    /// Drop the slot for `peer` once no key arrived and nobody waits on it.
    fn release_empty_slot(&self, peer: &PeerName) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let unused = peers
            .get(peer)
            .is_some_and(|slot| slot.borrow().is_none() && slot.receiver_count() == 0);
        if unused {
            peers.remove(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kemlink_crypto::MlKem512;

    use super::*;

    fn peer(name: &str) -> PeerName {
        PeerName::new(name).unwrap()
    }

    fn key(byte: u8) -> KemPublicKey {
        KemPublicKey::from_bytes(vec![byte; 800])
    }

    #[test]
    fn initialize_generates_ml_kem_identity() {
        let identity = IdentityStore::initialize(&MlKem512).unwrap();
        assert_eq!(identity.public_key().len(), MlKem512::PUBLIC_KEY_LEN);
    }

    #[test]
    fn store_and_lookup() {
        let identity = IdentityStore::initialize(&MlKem512).unwrap();
        let bob = peer("bob");

        assert!(!identity.has_peer_key(&bob));
        assert!(!identity.store_peer_key(&bob, key(1)));
        assert!(identity.has_peer_key(&bob));
        assert_eq!(identity.peer_key(&bob), Some(key(1)));
        assert_eq!(identity.known_peers(), vec![bob]);
    }

    #[test]
    fn overwrite_is_allowed_and_reported() {
        let identity = IdentityStore::initialize(&MlKem512).unwrap();
        let bob = peer("bob");

        identity.store_peer_key(&bob, key(1));
        assert!(!identity.store_peer_key(&bob, key(1)), "same key is not a replacement");
        assert!(identity.store_peer_key(&bob, key(2)));
        assert_eq!(identity.peer_key(&bob), Some(key(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_key_stored_later() {
        let identity = Arc::new(IdentityStore::initialize(&MlKem512).unwrap());
        let bob = peer("bob");

        let writer = Arc::clone(&identity);
        let writer_peer = bob.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer.store_peer_key(&writer_peer, key(7));
        });

        let found = identity.wait_for_peer_key(&bob, Duration::from_secs(10)).await;
        assert_eq!(found, Some(key(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let identity = IdentityStore::initialize(&MlKem512).unwrap();
        let found = identity.wait_for_peer_key(&peer("ghost"), Duration::from_secs(10)).await;
        assert_eq!(found, None);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waits_leave_no_slot_behind() {
        let identity = IdentityStore::initialize(&MlKem512).unwrap();
        let ghost = peer("ghost");

        let (short, long) = tokio::join!(
            identity.wait_for_peer_key(&ghost, Duration::from_secs(1)),
            async {
                let found = identity.wait_for_peer_key(&ghost, Duration::from_secs(5)).await;
                let slots = identity.peers.read().unwrap().len();
                (found, slots)
            },
        );
        assert_eq!(short, None);
        assert_eq!(long, (None, 0));
        assert!(identity.known_peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slot_survives_while_another_waiter_remains() {
        let identity = Arc::new(IdentityStore::initialize(&MlKem512).unwrap());
        let bob = peer("bob");

        let waiter = {
            let identity = Arc::clone(&identity);
            let bob = bob.clone();
            tokio::spawn(async move { identity.wait_for_peer_key(&bob, Duration::from_secs(10)).await })
        };
        assert_eq!(identity.wait_for_peer_key(&bob, Duration::from_secs(1)).await, None);
        assert!(identity.peers.read().unwrap().contains_key(&bob));

        identity.store_peer_key(&bob, key(9));
        assert_eq!(waiter.await.unwrap(), Some(key(9)));
    }

    #[tokio::test]
    async fn wait_returns_cached_key_immediately() {
        let identity = IdentityStore::initialize(&MlKem512).unwrap();
        let bob = peer("bob");
        identity.store_peer_key(&bob, key(3));

        let found = identity.wait_for_peer_key(&bob, Duration::ZERO).await;
        assert_eq!(found, Some(key(3)));
    }
}
