use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

/// Opaque node identifier, generated once per process start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle role of a member as seen by the local node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberRole {
    Joining,
    Follower,
    Master,
    Removed,
}

impl MemberRole {
    pub fn is_live(&self) -> bool {
        !matches!(self, MemberRole::Removed)
    }
}

/// A single member of the cluster.
///
/// Identity is the network address: two `Member` values with the same
/// address are equal regardless of id or role. A restarted process keeps its
/// address but gets a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub address: SocketAddr,
    pub role: MemberRole,
}

impl Member {
    pub fn new(address: SocketAddr, role: MemberRole) -> Self {
        Self {
            id: MemberId::new(),
            address,
            role,
        }
    }

    pub fn is_live(&self) -> bool {
        self.role.is_live()
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Snapshot of the cluster as known by one node.
///
/// Members are keyed (and therefore ordered) by address, so the
/// lowest-address tie-break is the first live entry. Removed members stay
/// in the map, flagged, until `MembershipService::purge_removed` runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterView {
    /// Generation counter, bumped on every mutation.
    pub version: u64,
    pub members: BTreeMap<SocketAddr, Member>,
    pub master: Option<SocketAddr>,
}

impl ClusterView {
    /// Live members in address order.
    pub fn live_members(&self) -> Vec<Member> {
        self.members
            .values()
            .filter(|member| member.is_live())
            .cloned()
            .collect()
    }

    pub fn live_addresses(&self) -> Vec<SocketAddr> {
        self.members
            .values()
            .filter(|member| member.is_live())
            .map(|member| member.address)
            .collect()
    }

    pub fn get(&self, address: &SocketAddr) -> Option<&Member> {
        self.members.get(address)
    }

    pub fn is_live(&self, address: &SocketAddr) -> bool {
        self.members
            .get(address)
            .map(|member| member.is_live())
            .unwrap_or(false)
    }

    pub fn master_member(&self) -> Option<&Member> {
        self.master.and_then(|addr| self.members.get(&addr))
    }

    /// Lowest live address, the winner of every master tie-break.
    pub fn lowest_live_address(&self) -> Option<SocketAddr> {
        self.members
            .values()
            .find(|member| member.is_live())
            .map(|member| member.address)
    }

    /// Inserts a member, or revives and updates an existing entry.
    /// Returns true if the address was not live before.
    pub(crate) fn upsert(&mut self, member: Member) -> bool {
        match self.members.get_mut(&member.address) {
            Some(existing) => {
                let was_live = existing.is_live();
                existing.id = member.id;
                if !was_live || existing.role == MemberRole::Joining {
                    existing.role = member.role;
                }
                !was_live
            }
            None => {
                self.members.insert(member.address, member);
                true
            }
        }
    }

    /// Makes `address` the only member with the MASTER role.
    pub(crate) fn set_master(&mut self, address: SocketAddr) {
        for member in self.members.values_mut() {
            if member.role == MemberRole::Master && member.address != address {
                member.role = MemberRole::Follower;
            }
        }
        if let Some(member) = self.members.get_mut(&address) {
            member.role = MemberRole::Master;
        }
        self.master = Some(address);
    }

    /// Hands the MASTER role to the lowest live address. Returns the winner.
    pub(crate) fn elect_lowest(&mut self) -> Option<SocketAddr> {
        self.master = None;
        let winner = self.lowest_live_address()?;
        self.set_master(winner);
        Some(winner)
    }
}
