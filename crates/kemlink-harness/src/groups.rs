//! Relay-side group registry.
//!
//! The relay allocates group ids and tracks membership so it can route
//! key material and fan out group messages. It never sees a group key.
//!
//! # Invariants
//!
//! - The admin is always a member and cannot be removed.
//! - Group ids are unique within the registry.

use std::{collections::HashMap, ops::Sub, time::Duration};

use kemlink_core::GroupInfo;
use kemlink_proto::{GroupId, PeerName};
use sha2::{Digest, Sha256};

/// A group as the relay sees it.
#[derive(Debug, Clone)]
pub struct RelayGroup<I> {
    /// Allocated id
    pub group_id: GroupId,
    /// Display name
    pub name: String,
    /// Creator
    pub admin: PeerName,
    /// Members in join order, admin included
    pub members: Vec<PeerName>,
    /// Creation time, for expiry
    pub created_at: I,
}

impl<I> RelayGroup<I> {
    /// Whether `user` belongs to the group.
    pub fn is_member(&self, user: &PeerName) -> bool {
        self.members.contains(user)
    }

    /// Whether `user` created the group.
    pub fn is_admin(&self, user: &PeerName) -> bool {
        self.admin == *user
    }

    /// Add `user`. Returns false if already a member.
    pub fn add_member(&mut self, user: PeerName) -> bool {
        if self.is_member(&user) {
            return false;
        }
        self.members.push(user);
        true
    }

    /// Remove `user`. The admin cannot be removed.
    pub fn remove_member(&mut self, user: &PeerName) -> bool {
        if self.is_admin(user) {
            return false;
        }
        let before = self.members.len();
        self.members.retain(|m| m != user);
        self.members.len() != before
    }

    /// Snapshot for clients.
    pub fn info(&self) -> GroupInfo {
        GroupInfo {
            group_id: self.group_id.clone(),
            name: self.name.clone(),
            admin: self.admin.clone(),
            members: self.members.clone(),
        }
    }
}

/// First 16 hex chars of `SHA-256(name || admin || created)`.
///
/// `attempt` is mixed in only on collision.
fn make_group_id(name: &str, admin: &PeerName, created: Duration, attempt: u32) -> GroupId {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(admin.as_str().as_bytes());
    hasher.update(created.as_nanos().to_be_bytes());
    if attempt > 0 {
        hasher.update(attempt.to_be_bytes());
    }
    let digest = hasher.finalize();

    let Ok(id) = GroupId::new(hex::encode(&digest[..GroupId::LEN / 2])) else {
        unreachable!("hex of 8 bytes is a valid group id")
    };
    id
}

/// All groups known to the relay.
#[derive(Debug)]
pub struct GroupRegistry<I> {
    groups: HashMap<GroupId, RelayGroup<I>>,
    expiration: Duration,
}

impl<I> GroupRegistry<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty registry whose groups expire `expiration` after creation.
    pub fn new(expiration: Duration) -> Self {
        Self { groups: HashMap::new(), expiration }
    }

    /// Create a group. `created` is the creation time as an offset from a
    /// fixed epoch and feeds the id.
    pub fn create(
        &mut self,
        name: &str,
        admin: &PeerName,
        members: &[PeerName],
        created_at: I,
        created: Duration,
    ) -> &RelayGroup<I> {
        let mut attempt = 0;
        let mut group_id = make_group_id(name, admin, created, attempt);
        while self.groups.contains_key(&group_id) {
            attempt += 1;
            group_id = make_group_id(name, admin, created, attempt);
        }

        let mut group = RelayGroup {
            group_id: group_id.clone(),
            name: name.to_string(),
            admin: admin.clone(),
            members: vec![admin.clone()],
            created_at,
        };
        for member in members {
            group.add_member(member.clone());
        }

        self.groups.entry(group_id).or_insert(group)
    }

    /// Look up a group.
    pub fn get(&self, group_id: &GroupId) -> Option<&RelayGroup<I>> {
        self.groups.get(group_id)
    }

    /// Look up a group mutably.
    pub fn get_mut(&mut self, group_id: &GroupId) -> Option<&mut RelayGroup<I>> {
        self.groups.get_mut(group_id)
    }

    /// Delete a group. Returns whether it existed.
    pub fn delete(&mut self, group_id: &GroupId) -> bool {
        self.groups.remove(group_id).is_some()
    }

    /// Every group `user` is a member of, sorted by id.
    pub fn groups_of(&self, user: &PeerName) -> Vec<GroupInfo> {
        let mut groups: Vec<_> =
            self.groups.values().filter(|g| g.is_member(user)).map(RelayGroup::info).collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        groups
    }

    /// Drop groups older than the expiration. Returns how many were removed.
    pub fn cleanup_expired(&mut self, now: I) -> usize {
        let before = self.groups.len();
        let expiration = self.expiration;
        self.groups.retain(|_, g| now - g.created_at <= expiration);
        before - self.groups.len()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
