//! Group session store.
//!
//! Tracks the groups we belong to and, once distributed, their shared key.
//! A group becomes usable for messaging only after its key is installed.
//!
//! # Invariants
//!
//! - One key per group. A second, different key for the same group is a
//!   conflict and is rejected, never applied.
//! - `members` always contains `admin`.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{PoisonError, RwLock},
};

use kemlink_crypto::SymmetricKey;
use kemlink_proto::{GroupId, PeerName};

use crate::error::ClientError;

/// Our role in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRole {
    /// We created the group and distribute its key.
    Admin,
    /// We were invited and receive the key from the admin.
    Member,
}

/// A group we belong to.
#[derive(Debug, Clone)]
pub struct Group<I> {
    /// Relay-assigned id
    pub id: GroupId,
    /// Display name
    pub name: String,
    /// Creator and key distributor
    pub admin: PeerName,
    /// All members, admin included
    pub members: BTreeSet<PeerName>,
    /// Shared key, once installed
    pub key: Option<SymmetricKey>,
    /// Our role
    pub role: GroupRole,
    /// When we learned about the group
    pub joined_at: I,
}

impl<I> Group<I> {
    /// New keyless group. `admin` is added to `members`.
    pub fn new(
        id: GroupId,
        name: impl Into<String>,
        admin: PeerName,
        members: impl IntoIterator<Item = PeerName>,
        role: GroupRole,
        joined_at: I,
    ) -> Self {
        let mut members: BTreeSet<_> = members.into_iter().collect();
        members.insert(admin.clone());
        Self { id, name: name.into(), admin, members, key: None, role, joined_at }
    }

    /// Whether `peer` belongs to the group.
    pub fn is_member(&self, peer: &PeerName) -> bool {
        self.members.contains(peer)
    }
}

/// Result of [`GroupSessionStore::install_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Key installed; the group is now usable.
    Installed,
    /// The same key was already installed.
    Duplicate,
    /// A different key is already installed and was kept.
    Conflict,
}

/// Maps group id to group state.
pub struct GroupSessionStore<I> {
    groups: RwLock<HashMap<GroupId, Group<I>>>,
}

impl<I: Copy> GroupSessionStore<I> {
    /// Empty store.
    pub fn new() -> Self {
        Self { groups: RwLock::new(HashMap::new()) }
    }

    /// Add `group` unless one with the same id exists. Returns whether it was added.
    pub fn insert(&self, group: Group<I>) -> bool {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if groups.contains_key(&group.id) {
            return false;
        }
        groups.insert(group.id.clone(), group);
        true
    }

    /// Snapshot of a group.
    pub fn get(&self, id: &GroupId) -> Option<Group<I>> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.get(id).cloned()
    }

    /// Whether the group is known.
    pub fn contains(&self, id: &GroupId) -> bool {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.contains_key(id)
    }

    /// Known group ids, sorted.
    pub fn ids(&self) -> Vec<GroupId> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = groups.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Installed key of a group.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if the group is not known
    /// - `GroupKeyNotReady` if no key has been installed
    pub fn key(&self, id: &GroupId) -> Result<SymmetricKey, ClientError> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let group = groups.get(id).ok_or_else(|| ClientError::UnknownGroup { group_id: id.clone() })?;
        group.key.clone().ok_or_else(|| ClientError::GroupKeyNotReady { group_id: id.clone() })
    }

    /// Whether a key is installed for the group.
    pub fn has_key(&self, id: &GroupId) -> bool {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.get(id).is_some_and(|g| g.key.is_some())
    }

    /// Install the group key if none is installed yet.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if the group is not known
    pub fn install_key(&self, id: &GroupId, key: SymmetricKey) -> Result<InstallOutcome, ClientError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group =
            groups.get_mut(id).ok_or_else(|| ClientError::UnknownGroup { group_id: id.clone() })?;

        match &group.key {
            None => {
                group.key = Some(key);
                Ok(InstallOutcome::Installed)
            },
            Some(existing) if *existing == key => Ok(InstallOutcome::Duplicate),
            Some(_) => {
                tracing::warn!(group_id = %id, "conflicting group key ignored");
                Ok(InstallOutcome::Conflict)
            },
        }
    }

    /// Replace the member list. The admin is always kept.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if the group is not known
    pub fn set_members(
        &self,
        id: &GroupId,
        members: impl IntoIterator<Item = PeerName>,
    ) -> Result<(), ClientError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group =
            groups.get_mut(id).ok_or_else(|| ClientError::UnknownGroup { group_id: id.clone() })?;

        group.members = members.into_iter().collect();
        group.members.insert(group.admin.clone());
        Ok(())
    }

    /// Add one member. Returns whether it was new.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if the group is not known
    pub fn add_member(&self, id: &GroupId, member: PeerName) -> Result<bool, ClientError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group =
            groups.get_mut(id).ok_or_else(|| ClientError::UnknownGroup { group_id: id.clone() })?;
        Ok(group.members.insert(member))
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Copy> Default for GroupSessionStore<I> {
    fn default() -> Self {
        Self::new()
    }
}
