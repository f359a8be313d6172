//! Kemlink Core
//!
//! The seams between protocol logic and the outside world. Protocol code in
//! `kemlink-client` only ever touches time and randomness through
//! [`Environment`] and the relay through [`Transport`], so the whole protocol
//! runs unchanged against a real relay or an in-memory one with a seeded RNG.
//!
//! # Components
//!
//! - [`Environment`]: monotonic clock and secure randomness
//! - [`Transport`]: outbound relay operations
//! - [`TransportEvent`]: inbound relay notifications
//! - [`TransportError`]: relay failures

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod transport;

pub use env::Environment;
pub use error::TransportError;
pub use transport::{GroupInfo, Transport, TransportEvent};
