//! Client
//!
//! Endpoint logic for kemlink: a party generates an ML-KEM identity,
//! establishes pairwise sessions with a single encapsulation, receives or
//! distributes group keys, and exchanges AEAD-sealed messages through an
//! untrusted relay.
//!
//! # Architecture
//!
//! The relay is reached through [`kemlink_core::Transport`]; inbound traffic
//! arrives as [`kemlink_core::TransportEvent`]s that the caller feeds into
//! [`Client::handle_event`], which returns [`ClientAction`]s. Time and
//! randomness come from [`kemlink_core::Environment`] so tests run against a
//! seeded RNG and a paused clock.
//!
//! # Components
//!
//! - [`Client`]: Facade over everything below
//! - [`IdentityStore`]: Own key pair and cached peer public keys
//! - [`SessionStore`]: Pairwise session keys, first writer wins
//! - [`SessionEstablisher`]: Initiator and responder handshake paths
//! - [`GroupSessionStore`]: Groups and their keys
//! - [`GroupKeyDistributor`]: Group creation and key wrapping
//! - [`MessageCodec`]: Seal and open envelopes under a key

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod codec;
mod config;
mod distributor;
mod error;
mod establisher;
mod event;
mod group_store;
mod identity;
mod session_store;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use codec::MessageCodec;
pub use config::{ClientConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEY_REQUEST_TIMEOUT, duration_secs};
pub use distributor::{DistributionReport, GroupKeyDistributor};
pub use error::{ClientError, HandshakePhase};
pub use establisher::{HandshakeAttempt, SessionEstablisher};
pub use event::ClientAction;
pub use group_store::{Group, GroupRole, GroupSessionStore, InstallOutcome};
pub use identity::IdentityStore;
pub use kemlink_core::Environment;
pub use session_store::{HandshakeRole, PeerSession, PutOutcome, SessionStore};
