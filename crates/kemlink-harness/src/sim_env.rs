//! Deterministic environment for simulation and tests.
//!
//! Randomness comes from a seeded ChaCha20 stream shared by all clones, so a
//! scenario replays byte for byte under the same seed. Time is tokio's clock,
//! which tests can pause and advance.

use std::sync::{Arc, Mutex, PoisonError};

use kemlink_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Seeded environment.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment whose random stream is fixed by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }

    /// Independent environment derived from this one, e.g. one per party.
    pub fn fork(&self) -> Self {
        Self::with_seed(self.random_u64())
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
