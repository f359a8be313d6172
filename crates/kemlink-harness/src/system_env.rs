//! Production environment: system clock and OS randomness.

use kemlink_core::Environment;

/// Environment backed by the system clock and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Without working randomness no nonce or key can
/// be generated safely, so there is nothing sensible to continue with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
