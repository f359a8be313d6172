//! Shared fixtures for the end-to-end tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use kemlink_client::ClientConfig;
use kemlink_crypto::{
    CryptoError, Kem, KemKeyPair, KemPrivateKey, KemPublicKey, MlKem512, SharedSecret,
};
use kemlink_harness::{MemoryRelay, Party, RelayConfig, SimEnv};
use kemlink_proto::PeerName;

/// Long enough for ML-KEM in unoptimized builds.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn peer(name: &str) -> PeerName {
    PeerName::new(name).unwrap()
}

/// ML-KEM-512 that counts encapsulations and decapsulations.
#[derive(Default)]
pub struct CountingKem {
    inner: MlKem512,
    ops: AtomicUsize,
}

impl CountingKem {
    pub fn ops(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
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
        self.inner.generate_keypair()
    }

    fn encapsulate(&self, public_key: &KemPublicKey) -> Result<(Vec<u8>, SharedSecret), CryptoError> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.encapsulate(public_key)
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &KemPrivateKey,
    ) -> Result<SharedSecret, CryptoError> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.decapsulate(ciphertext, private_key)
    }
}

pub struct World {
    pub env: SimEnv,
    pub relay: MemoryRelay<SimEnv>,
}

impl World {
    pub fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let relay = MemoryRelay::new(env.clone(), RelayConfig::default());
        Self { env, relay }
    }

    pub async fn join(&self, name: &str) -> Party<SimEnv> {
        self.join_with(name, Arc::new(MlKem512), ClientConfig::default()).await
    }

    pub async fn join_with(
        &self,
        name: &str,
        kem: Arc<dyn Kem>,
        config: ClientConfig,
    ) -> Party<SimEnv> {
        Party::join(&self.relay, &peer(name), self.env.fork(), kem, config).await.unwrap()
    }
}

/// Poll `cond` until it holds or `WAIT` elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Wait until `party` holds a public key for each of `names`.
pub async fn knows(party: &Party<SimEnv>, names: &[&str]) -> bool {
    let client = party.client();
    eventually(|| {
        let known = client.known_peers();
        names.iter().all(|n| known.contains(&peer(n)))
    })
    .await
}
