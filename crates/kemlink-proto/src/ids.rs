//! Peer and group identifiers.
//!
//! Both are validated on construction and on deserialization, so any value of
//! these types in memory is well-formed.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// A peer's unique name on the relay.
///
/// Non-empty, at most [`PeerName::MAX_LEN`] bytes, no control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerName(String);

impl PeerName {
    /// Maximum name length in bytes.
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| ProtocolError::InvalidIdentifier {
            kind: "peer name",
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("empty"));
        }
        if name.len() > Self::MAX_LEN {
            return Err(invalid(&format!("{} bytes exceeds {}", name.len(), Self::MAX_LEN)));
        }
        if name.chars().any(char::is_control) {
            return Err(invalid("contains control characters"));
        }

        Ok(Self(name))
    }

    /// Name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PeerName {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PeerName> for String {
    fn from(name: PeerName) -> Self {
        name.0
    }
}

/// A relay-allocated group identifier: 16 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Length of a group id in characters.
    pub const LEN: usize = 16;

    /// Validate and wrap a group id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.len() != Self::LEN {
            return Err(ProtocolError::InvalidIdentifier {
                kind: "group id",
                reason: format!("expected {} characters, got {}", Self::LEN, id.len()),
            });
        }
        if !id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(ProtocolError::InvalidIdentifier {
                kind: "group id",
                reason: "not lowercase hex".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GroupId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for GroupId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.0
    }
}
