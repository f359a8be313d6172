//! Session establishment: the pairwise KEM handshake.
//!
//! Per peer, the relationship moves from no session to an established one
//! through exactly one of two symmetric paths:
//!
//! ```text
//!                 establish()                       ciphertext received
//! NoSession ──────────────────► Initiating    NoSession ──────────────────► AwaitingCiphertext
//!                                   │                                              │
//!             fetch key, encapsulate, send                              decapsulate
//!                                   ▼                                              ▼
//!                           SessionEstablished ◄───────────────────────── SessionEstablished
//! ```
//!
//! The initiator installs its key as soon as the ciphertext is handed to the
//! transport; the responder installs silently. There is no acknowledgement.
//!
//! # Invariants
//!
//! - At most one in-flight attempt per `(peer, role)`. A second `establish`
//!   for the same peer subscribes to the first attempt's outcome instead of
//!   running another handshake.
//! - A failed handshake never writes to the session store.
//! - First installed key wins. A ciphertext arriving for a peer we already
//!   have a session with is discarded, and an initiator that loses the race
//!   to a responder install returns the key that is already stored.
//!
//! # Security
//!
//! ML-KEM decapsulation uses implicit rejection: a forged ciphertext of the
//! right length yields an unrelated key rather than an error. The mismatch
//! only surfaces when the first message fails to decrypt.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use kemlink_core::{Environment, Transport};
use kemlink_crypto::{Kem, KemPublicKey, SymmetricKey, derive_session_key};
use kemlink_proto::{KemCiphertext, Payload, PeerName};
use tokio::sync::watch;

use crate::{
    config::ClientConfig,
    error::{ClientError, HandshakePhase},
    identity::IdentityStore,
    session_store::{HandshakeRole, PeerSession, PutOutcome, SessionStore},
};

type Outcome = Option<Result<SymmetricKey, ClientError>>;

type AttemptMap<I> = Mutex<HashMap<(PeerName, HandshakeRole), HandshakeAttempt<I>>>;

/// An outstanding handshake.
#[derive(Debug, Clone)]
pub struct HandshakeAttempt<I> {
    /// Peer of the handshake
    pub peer: PeerName,
    /// Our role
    pub role: HandshakeRole,
    /// When the attempt started
    pub started_at: I,
    /// How long the attempt may take
    pub timeout: Duration,
    outcome: watch::Receiver<Outcome>,
}

/// Removes its attempt from the map when dropped, including when the owning
/// future is cancelled. Waiters then observe a closed channel.
struct AttemptGuard<'a, I> {
    attempts: &'a AttemptMap<I>,
    key: (PeerName, HandshakeRole),
    outcome: watch::Sender<Outcome>,
}

impl<I> AttemptGuard<'_, I> {
    fn finish(&self, result: &Result<SymmetricKey, ClientError>) {
        self.outcome.send_replace(Some(result.clone()));
    }
}

impl<I> Drop for AttemptGuard<'_, I> {
    fn drop(&mut self) {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts.remove(&self.key);
    }
}

enum Begin<'a, I> {
    Started(AttemptGuard<'a, I>),
    Joined(watch::Receiver<Outcome>),
}

fn failed(peer: &PeerName, phase: HandshakePhase, cause: impl Display) -> ClientError {
    ClientError::HandshakeFailed { peer: peer.clone(), phase, reason: cause.to_string() }
}

fn cancelled(peer: &PeerName) -> ClientError {
    failed(peer, HandshakePhase::Cancelled, "initiating attempt ended without a result")
}

/// Runs the pairwise handshake and writes the result into the session store.
pub struct SessionEstablisher<E: Environment> {
    env: E,
    kem: Arc<dyn Kem>,
    transport: Arc<dyn Transport>,
    identity: Arc<IdentityStore>,
    sessions: Arc<SessionStore<E::Instant>>,
    config: ClientConfig,
    attempts: AttemptMap<E::Instant>,
}

impl<E: Environment> SessionEstablisher<E> {
    /// Create an establisher over shared stores.
    pub fn new(
        env: E,
        kem: Arc<dyn Kem>,
        transport: Arc<dyn Transport>,
        identity: Arc<IdentityStore>,
        sessions: Arc<SessionStore<E::Instant>>,
        config: ClientConfig,
    ) -> Self {
        Self {
            env,
            kem,
            transport,
            identity,
            sessions,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Handshakes currently in flight.
    pub fn pending(&self) -> Vec<HandshakeAttempt<E::Instant>> {
        let attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts.values().cloned().collect()
    }

    /// Establish a session with `peer` as initiator.
    ///
    /// Returns the existing key without any cryptographic work if a session
    /// is already installed. `timeout` (default
    /// [`ClientConfig::handshake_timeout`]) bounds the whole call; the wait
    /// for the peer's public key is further capped by
    /// [`ClientConfig::key_request_timeout`].
    ///
    /// # Errors
    ///
    /// - `PeerUnavailable` if the public key does not arrive in time, the
    ///   relay refuses the lookup, or the handshake is still incomplete when
    ///   `timeout` elapses. Not retried automatically.
    /// - `HandshakeFailed` if encapsulation or sending fails
    pub async fn establish(
        &self,
        peer: &PeerName,
        timeout: Option<Duration>,
    ) -> Result<SymmetricKey, ClientError> {
        if let Some(key) = self.sessions.get(peer) {
            tracing::debug!(%peer, "session already established");
            return Ok(key);
        }

        let timeout = timeout.unwrap_or(self.config.handshake_timeout);
        let guard = match self.begin(peer, HandshakeRole::Initiator, timeout) {
            Begin::Started(guard) => guard,
            Begin::Joined(outcome) => {
                tracing::debug!(%peer, "joining in-flight handshake");
                return self.join(peer, outcome, timeout).await;
            },
        };

        let result = match tokio::time::timeout(timeout, self.initiate(peer, timeout)).await {
            Ok(result) => result,
            Err(_) => self.sessions.get(peer).ok_or_else(|| {
                tracing::warn!(%peer, ?timeout, "handshake timed out");
                ClientError::PeerUnavailable {
                    peer: peer.clone(),
                    reason: format!("handshake not complete after {timeout:?}"),
                }
            }),
        };
        guard.finish(&result);
        result
    }

    /// Responder path for an inbound KEM ciphertext from `peer`.
    ///
    /// Returns the installed key, or `None` if the ciphertext was discarded
    /// because a session already exists (first established wins).
    ///
    /// # Errors
    ///
    /// - `HandshakeFailed` if decapsulation fails; nothing is installed
    pub fn on_ciphertext(
        &self,
        peer: &PeerName,
        ciphertext: &[u8],
    ) -> Result<Option<SymmetricKey>, ClientError> {
        if self.sessions.has(peer) {
            tracing::debug!(%peer, "duplicate handshake ciphertext discarded");
            return Ok(None);
        }

        let Begin::Started(_guard) =
            self.begin(peer, HandshakeRole::Responder, self.config.handshake_timeout)
        else {
            tracing::debug!(%peer, "concurrent handshake ciphertext discarded");
            return Ok(None);
        };

        let secret = self
            .kem
            .decapsulate(ciphertext, self.identity.private_key())
            .map_err(|e| failed(peer, HandshakePhase::Decapsulate, e))?;
        let key = derive_session_key(&secret);

        match self.install(peer, key.clone(), HandshakeRole::Responder) {
            PutOutcome::Inserted => Ok(Some(key)),
            PutOutcome::Existing(_) => Ok(None),
        }
    }

    fn begin(&self, peer: &PeerName, role: HandshakeRole, timeout: Duration) -> Begin<'_, E::Instant> {
        let key = (peer.clone(), role);
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = attempts.get(&key) {
            return Begin::Joined(existing.outcome.clone());
        }

        let (tx, rx) = watch::channel(None);
        attempts.insert(
            key.clone(),
            HandshakeAttempt {
                peer: peer.clone(),
                role,
                started_at: self.env.now(),
                timeout,
                outcome: rx,
            },
        );

        Begin::Started(AttemptGuard { attempts: &self.attempts, key, outcome: tx })
    }

    async fn join(
        &self,
        peer: &PeerName,
        mut outcome: watch::Receiver<Outcome>,
        timeout: Duration,
    ) -> Result<SymmetricKey, ClientError> {
        match tokio::time::timeout(timeout, outcome.wait_for(Option::is_some)).await {
            Ok(Ok(result)) => result.clone().unwrap_or_else(|| Err(cancelled(peer))),
            Ok(Err(_)) => self.sessions.get(peer).ok_or_else(|| cancelled(peer)),
            Err(_) => Err(ClientError::PeerUnavailable {
                peer: peer.clone(),
                reason: format!("handshake still pending after {timeout:?}"),
            }),
        }
    }

    async fn initiate(&self, peer: &PeerName, timeout: Duration) -> Result<SymmetricKey, ClientError> {
        let public_key = match self.identity.peer_key(peer) {
            Some(key) => key,
            None => match self.fetch_public_key(peer, timeout).await {
                Ok(key) => key,
                Err(e) => return self.sessions.get(peer).ok_or(e),
            },
        };

        // The peer may have completed a handshake towards us while we waited.
        if let Some(key) = self.sessions.get(peer) {
            tracing::debug!(%peer, "peer-initiated session installed while waiting for key");
            return Ok(key);
        }

        let (ciphertext, secret) = self
            .kem
            .encapsulate(&public_key)
            .map_err(|e| failed(peer, HandshakePhase::Encapsulate, e))?;
        let key = derive_session_key(&secret);

        let payload = Payload::KemCiphertext(KemCiphertext { ciphertext }).encode()?;
        self.transport
            .send_to_peer(peer, payload)
            .await
            .map_err(|e| failed(peer, HandshakePhase::Send, e))?;
        tracing::debug!(%peer, "handshake ciphertext sent");

        match self.install(peer, key.clone(), HandshakeRole::Initiator) {
            PutOutcome::Inserted => Ok(key),
            PutOutcome::Existing(existing) => Ok(existing),
        }
    }

    async fn fetch_public_key(
        &self,
        peer: &PeerName,
        timeout: Duration,
    ) -> Result<KemPublicKey, ClientError> {
        let wait = timeout.min(self.config.key_request_timeout);

        tracing::debug!(%peer, "requesting public key");
        self.transport
            .request_public_key(peer)
            .await
            .map_err(|e| ClientError::PeerUnavailable { peer: peer.clone(), reason: e.to_string() })?;

        self.identity.wait_for_peer_key(peer, wait).await.ok_or_else(|| {
            ClientError::PeerUnavailable {
                peer: peer.clone(),
                reason: format!("no public key after {wait:?}"),
            }
        })
    }

    fn install(&self, peer: &PeerName, key: SymmetricKey, role: HandshakeRole) -> PutOutcome {
        let outcome = self.sessions.put(PeerSession {
            peer: peer.clone(),
            key,
            established_at: self.env.now(),
            role,
        });

        match &outcome {
            PutOutcome::Inserted => tracing::info!(%peer, ?role, "session established"),
            PutOutcome::Existing(_) => {
                tracing::debug!(%peer, ?role, "session already installed, keeping first key");
            },
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use kemlink_crypto::MlKem512;

    use super::*;
    use crate::testing::{CountingKem, RecordingTransport, Sent, TestEnv, peer};

    struct Party {
        identity: Arc<IdentityStore>,
        sessions: Arc<SessionStore<tokio::time::Instant>>,
        transport: Arc<RecordingTransport>,
        kem: Arc<CountingKem>,
        establisher: Arc<SessionEstablisher<TestEnv>>,
    }

    fn party(name: &str, seed: u64) -> Party {
        let kem = CountingKem::new();
        let transport = RecordingTransport::new(name);
        let identity = Arc::new(IdentityStore::initialize(kem.as_ref()).unwrap());
        let sessions = Arc::new(SessionStore::new());
        let establisher = Arc::new(SessionEstablisher::new(
            TestEnv::with_seed(seed),
            kem.clone(),
            transport.clone(),
            Arc::clone(&identity),
            Arc::clone(&sessions),
            ClientConfig::default(),
        ));
        Party { identity, sessions, transport, kem, establisher }
    }

    fn handshake_ciphertext(payload: &[u8]) -> Vec<u8> {
        match Payload::decode(payload).unwrap() {
            Payload::KemCiphertext(KemCiphertext { ciphertext }) => ciphertext,
            other => panic!("expected KEM ciphertext, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initiator_sends_one_ciphertext_and_installs_immediately() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());

        let key = alice.establisher.establish(&peer("bob"), None).await.unwrap();

        let sent = alice.transport.payloads_to(&peer("bob"));
        assert_eq!(sent.len(), 1);
        assert_eq!(handshake_ciphertext(&sent[0]).len(), MlKem512::CIPHERTEXT_LEN);
        assert_eq!(alice.sessions.get(&peer("bob")), Some(key));
    }

    #[tokio::test]
    async fn responder_derives_same_key() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());

        let alice_key = alice.establisher.establish(&peer("bob"), None).await.unwrap();
        let ct = handshake_ciphertext(&alice.transport.payloads_to(&peer("bob"))[0]);

        let bob_key = bob.establisher.on_ciphertext(&peer("alice"), &ct).unwrap();
        assert_eq!(bob_key, Some(alice_key.clone()));
        assert_eq!(bob.sessions.get(&peer("alice")), Some(alice_key));
        assert_eq!(
            bob.sessions.session(&peer("alice")).unwrap().role,
            HandshakeRole::Responder
        );
    }

    #[tokio::test]
    async fn establish_is_idempotent() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());

        let first = alice.establisher.establish(&peer("bob"), None).await.unwrap();
        let ops = alice.kem.crypto_ops();
        alice.transport.clear();

        let second = alice.establisher.establish(&peer("bob"), None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(alice.kem.crypto_ops(), ops);
        assert!(alice.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn duplicate_ciphertext_is_discarded() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());

        alice.establisher.establish(&peer("bob"), None).await.unwrap();
        let ct = handshake_ciphertext(&alice.transport.payloads_to(&peer("bob"))[0]);

        let installed = bob.establisher.on_ciphertext(&peer("alice"), &ct).unwrap();
        let decaps = bob.kem.decapsulations.load(Ordering::SeqCst);

        assert!(bob.establisher.on_ciphertext(&peer("alice"), &ct).unwrap().is_none());
        assert_eq!(bob.kem.decapsulations.load(Ordering::SeqCst), decaps);
        assert_eq!(bob.sessions.get(&peer("alice")), installed);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_times_out_as_peer_unavailable() {
        let alice = party("alice", 1);

        let result = alice.establisher.establish(&peer("ghost"), None).await;

        assert!(matches!(result, Err(ClientError::PeerUnavailable { .. })));
        assert_eq!(alice.transport.sent(), vec![Sent::KeyRequest { peer: peer("ghost") }]);
        assert!(!alice.sessions.has(&peer("ghost")));
        assert!(alice.establisher.pending().is_empty());
    }

    #[tokio::test]
    async fn relay_refusal_is_peer_unavailable() {
        let alice = party("alice", 1);
        alice.transport.reject_key_requests();

        let result = alice.establisher.establish(&peer("bob"), None).await;
        assert!(matches!(
            result,
            Err(ClientError::PeerUnavailable { reason, .. }) if reason.contains("no public key")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn key_arriving_during_wait_completes_handshake() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        let bob_key = bob.identity.public_key().clone();

        let identity = Arc::clone(&alice.identity);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            identity.store_peer_key(&peer("bob"), bob_key);
        });

        let key = alice.establisher.establish(&peer("bob"), None).await.unwrap();
        assert_eq!(alice.sessions.get(&peer("bob")), Some(key));
    }

    #[tokio::test]
    async fn encapsulation_failure_installs_nothing() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());
        alice.kem.fail_encapsulate.store(true, Ordering::SeqCst);

        let result = alice.establisher.establish(&peer("bob"), None).await;

        assert!(matches!(
            result,
            Err(ClientError::HandshakeFailed { phase: HandshakePhase::Encapsulate, .. })
        ));
        assert!(!alice.sessions.has(&peer("bob")));
        assert!(alice.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn send_failure_installs_nothing() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());
        alice.transport.fail_sends_to(&peer("bob"));

        let result = alice.establisher.establish(&peer("bob"), None).await;

        assert!(matches!(result, Err(ClientError::HandshakeFailed { phase: HandshakePhase::Send, .. })));
        assert!(!alice.sessions.has(&peer("bob")));
    }

    #[tokio::test]
    async fn malformed_ciphertext_is_handshake_failure() {
        let bob = party("bob", 2);

        let result = bob.establisher.on_ciphertext(&peer("alice"), &[0u8; 12]);

        assert!(matches!(
            result,
            Err(ClientError::HandshakeFailed { phase: HandshakePhase::Decapsulate, .. })
        ));
        assert!(!bob.sessions.has(&peer("alice")));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_establish_calls_are_coalesced() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        let bob_key = bob.identity.public_key().clone();

        let first = {
            let establisher = Arc::clone(&alice.establisher);
            tokio::spawn(async move { establisher.establish(&peer("bob"), None).await })
        };
        let second = {
            let establisher = Arc::clone(&alice.establisher);
            tokio::spawn(async move { establisher.establish(&peer("bob"), None).await })
        };

        // Both tasks are now parked: one waiting for the key, one on its outcome.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(alice.establisher.pending().len(), 1);
        alice.identity.store_peer_key(&peer("bob"), bob_key);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(alice.kem.encapsulations.load(Ordering::SeqCst), 1);
        assert_eq!(alice.transport.payloads_to(&peer("bob")).len(), 1);
        assert_eq!(
            alice.transport.sent().iter().filter(|s| matches!(s, Sent::KeyRequest { .. })).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_initiator_releases_attempt() {
        let alice = party("alice", 1);

        let task = {
            let establisher = Arc::clone(&alice.establisher);
            tokio::spawn(async move { establisher.establish(&peer("bob"), None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(alice.establisher.pending().len(), 1);

        task.abort();
        let _ = task.await;

        assert!(alice.establisher.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_send_times_out_and_clears_attempt() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());
        alice.transport.stall_sends();

        let bob_name = peer("bob");
        let (first, joined) = tokio::join!(
            alice.establisher.establish(&bob_name, Some(Duration::from_secs(1))),
            alice.establisher.establish(&bob_name, Some(Duration::from_secs(5))),
        );

        assert!(matches!(first, Err(ClientError::PeerUnavailable { .. })));
        assert!(joined.is_err());
        assert!(alice.establisher.pending().is_empty());
        assert!(!alice.sessions.has(&bob_name));
    }

    #[tokio::test]
    async fn simultaneous_initiation_leaves_one_key_per_side() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        alice.identity.store_peer_key(&peer("bob"), bob.identity.public_key().clone());
        bob.identity.store_peer_key(&peer("alice"), alice.identity.public_key().clone());

        let (bob_name, alice_name) = (peer("bob"), peer("alice"));
        let (a, b) = tokio::join!(
            alice.establisher.establish(&bob_name, None),
            bob.establisher.establish(&alice_name, None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // Crossing ciphertexts arrive after both sides installed: both are dropped.
        let to_bob = handshake_ciphertext(&alice.transport.payloads_to(&peer("bob"))[0]);
        let to_alice = handshake_ciphertext(&bob.transport.payloads_to(&peer("alice"))[0]);
        assert!(bob.establisher.on_ciphertext(&peer("alice"), &to_bob).unwrap().is_none());
        assert!(alice.establisher.on_ciphertext(&peer("bob"), &to_alice).unwrap().is_none());

        assert_eq!(alice.sessions.len(), 1);
        assert_eq!(bob.sessions.len(), 1);
        assert_eq!(alice.sessions.get(&peer("bob")), Some(a));
        assert_eq!(bob.sessions.get(&peer("alice")), Some(b));
    }

    #[tokio::test]
    async fn responder_install_wins_over_late_initiator() {
        let alice = party("alice", 1);
        let bob = party("bob", 2);
        bob.identity.store_peer_key(&peer("alice"), alice.identity.public_key().clone());

        // Bob initiates; Alice receives the ciphertext before she ever calls establish.
        let bob_key = bob.establisher.establish(&peer("alice"), None).await.unwrap();
        let ct = handshake_ciphertext(&bob.transport.payloads_to(&peer("alice"))[0]);
        alice.establisher.on_ciphertext(&peer("bob"), &ct).unwrap();

        let alice_key = alice.establisher.establish(&peer("bob"), None).await.unwrap();
        assert_eq!(alice_key, bob_key);
        assert_eq!(alice.kem.encapsulations.load(Ordering::SeqCst), 0);
    }
}
