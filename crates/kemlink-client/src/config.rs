//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on waiting for a peer's public key (10 seconds).
pub const DEFAULT_KEY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a whole `establish` call (10 seconds).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration
///
/// Durations are (de)serialized as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Longest wait for a requested public key to arrive
    #[serde(with = "duration_secs")]
    pub key_request_timeout: Duration,
    /// Longest wait for `establish` when the caller gives no timeout,
    /// including time spent waiting on a coalesced attempt
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
    /// Handshake with every peer in a received peer directory
    pub auto_establish: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            key_request_timeout: DEFAULT_KEY_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            auto_establish: false,
        }
    }
}

/// Serde helpers for a `Duration` stored as whole seconds.
///
/// Use with `#[serde(with = "kemlink_client::duration_secs")]`. Sub-second
/// precision is truncated on the way out.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Write `d` as a `u64` second count.
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    /// Read a `u64` second count.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
