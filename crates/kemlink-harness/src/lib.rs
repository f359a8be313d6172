//! Harness
//!
//! Runs kemlink parties against an in-memory relay. Used by the end-to-end
//! tests and the `kemlink-sim` binary.
//!
//! # Components
//!
//! - [`MemoryRelay`]: user registry, public-key directory, payload forwarding
//!   and group routing; hands out a [`RelayHandle`] per user
//! - [`GroupRegistry`]: relay-side group ids, membership and expiry
//! - [`Party`]: a [`kemlink_client::Client`] with its event pump
//! - [`SimEnv`] / [`SystemEnv`]: seeded and production environments

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod groups;
pub mod party;
pub mod relay;
pub mod sim_env;
pub mod system_env;

pub use error::HarnessError;
pub use groups::{GroupRegistry, RelayGroup};
pub use party::{Observed, Party};
pub use relay::{DEFAULT_GROUP_EXPIRATION, Inbox, MemoryRelay, RelayConfig, RelayHandle};
pub use sim_env::SimEnv;
pub use system_env::SystemEnv;
