//! Pairwise session store.
//!
//! Single source of truth for "do we have a channel with this peer".
//!
//! # Invariants
//!
//! - At most one key per peer at any time
//! - An installed key is never overwritten implicitly: [`SessionStore::put`]
//!   is insert-if-absent (first writer wins). Only
//!   [`SessionStore::remove`] clears an entry.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use kemlink_crypto::SymmetricKey;
use kemlink_proto::PeerName;

/// Which side of the handshake we were on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeRole {
    /// We encapsulated and sent the ciphertext.
    Initiator,
    /// We received the ciphertext and decapsulated.
    Responder,
}

/// An established pairwise session.
#[derive(Debug, Clone)]
pub struct PeerSession<I> {
    /// The other party
    pub peer: PeerName,
    /// Shared AEAD key
    pub key: SymmetricKey,
    /// When the key was installed
    pub established_at: I,
    /// Our side of the handshake that produced the key
    pub role: HandshakeRole,
}

/// Result of [`SessionStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The session was installed.
    Inserted,
    /// A session already existed and was kept; carries its key.
    Existing(SymmetricKey),
}

/// Maps peer name to session key.
pub struct SessionStore<I> {
    sessions: RwLock<HashMap<PeerName, PeerSession<I>>>,
}

impl<I: Copy> SessionStore<I> {
    /// Empty store.
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Session key for `peer`.
    pub fn get(&self, peer: &PeerName) -> Option<SymmetricKey> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(peer).map(|s| s.key.clone())
    }

    /// Full session record for `peer`.
    pub fn session(&self, peer: &PeerName) -> Option<PeerSession<I>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(peer).cloned()
    }

    /// Whether a session exists for `peer`.
    pub fn has(&self, peer: &PeerName) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.contains_key(peer)
    }

    /// Install `session` unless one already exists for the same peer.
    pub fn put(&self, session: PeerSession<I>) -> PutOutcome {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = sessions.get(&session.peer) {
            return PutOutcome::Existing(existing.key.clone());
        }
        sessions.insert(session.peer.clone(), session);
        PutOutcome::Inserted
    }

    /// Tear down the session with `peer`. Returns whether one existed.
    pub fn remove(&self, peer: &PeerName) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(peer).is_some()
    }

    /// Peers with an established session, sorted.
    pub fn peers(&self) -> Vec<PeerName> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<_> = sessions.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Copy> Default for SessionStore<I> {
    fn default() -> Self {
        Self::new()
    }
}
