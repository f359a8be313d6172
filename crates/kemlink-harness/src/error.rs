//! Harness error types.

use kemlink_client::ClientError;
use kemlink_core::TransportError;
use kemlink_proto::ProtocolError;
use thiserror::Error;

/// Errors from setting up or driving a simulated party.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Relay refused the operation
    #[error("relay error: {0}")]
    Transport(#[from] TransportError),

    /// Client operation failed
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid peer name or group id
    #[error("invalid identifier: {0}")]
    Protocol(#[from] ProtocolError),

    /// An expected action did not happen in time
    #[error("{party} timed out waiting for {expected}")]
    Timeout {
        /// Party that was waiting
        party: String,
        /// What it waited for
        expected: String,
    },
}
