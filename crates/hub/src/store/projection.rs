// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory read models, rebuilt deterministically from the event log.
//!
//! Everything here is derived: replaying the same prefix of the log from an
//! empty projection always yields the same state. The only exception is the
//! `volatile` block (liveness and last-reported posture), which is fed by
//! request handlers and intentionally empty after a replay.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use ztproto::api::{DeviceInfo, NodeRole, NodeStatus};

use crate::model::{
    AccessPolicy, ClientDevice, DeviceStatus, Group, NetworkPolicy, Node, TrustSnapshot, User,
};
use crate::store::event::{DomainEvent, EventRecord};

/// Trust history entries retained per node.
const TRUST_HISTORY_CAP: usize = 100;

/// Liveness and posture reported by agents; not event-sourced.
#[derive(Debug, Default)]
pub struct VolatileState {
    pub last_heartbeat_ms: HashMap<String, u64>,
    pub last_device_info: HashMap<String, DeviceInfo>,
}

/// The projected read models.
#[derive(Debug, Default)]
pub struct Projection {
    pub schema_version: u32,
    /// Id of the last applied event.
    pub applied_id: u64,

    nodes: HashMap<String, Node>,
    /// hostname → node id of the current (non-revoked) holder.
    hostname_index: HashMap<String, String>,
    /// node bearer token → node id.
    node_tokens: HashMap<String, String>,
    /// Blacklisted public keys of revoked nodes.
    blacklist: HashSet<String>,

    users: HashMap<String, User>,
    email_index: HashMap<String, String>,
    groups: HashMap<String, Group>,
    group_name_index: HashMap<String, String>,

    policies: HashMap<String, AccessPolicy>,
    network_policies: HashMap<String, NetworkPolicy>,
    /// Insertion order of network policies, the final compile tie-break.
    network_policy_order: Vec<String>,

    devices: HashMap<String, ClientDevice>,
    config_tokens: HashMap<String, String>,

    trust_history: HashMap<String, Vec<TrustSnapshot>>,

    /// Currently allocated overlay addresses → owner aggregate id.
    allocations: HashMap<Ipv4Addr, String>,
    /// Released addresses → release time, for the reuse cool-down.
    released: HashMap<Ipv4Addr, u64>,
    /// Last `IpamExhausted` emission per pool, for rate-limiting.
    exhausted_at_ms: HashMap<String, u64>,

    pub volatile: VolatileState,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a full log replay.
    pub fn rebuild(records: &[EventRecord]) -> Self {
        let mut p = Self::new();
        for record in records {
            p.apply(record);
        }
        p
    }

    /// Apply one committed record. Must be called in id order.
    pub fn apply(&mut self, record: &EventRecord) {
        self.applied_id = record.id;
        match &record.event {
            DomainEvent::SchemaMigrated { version } => {
                self.schema_version = *version;
            }

            DomainEvent::NodeRegistered { node } => {
                self.hostname_index.insert(node.hostname.clone(), node.id.clone());
                self.nodes.insert(node.id.clone(), node.clone());
            }
            DomainEvent::NodeApproved { node_id, approved_by, node_token } => {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    if node.status == NodeStatus::Pending {
                        node.status = NodeStatus::Active;
                        node.approved_by = Some(approved_by.clone());
                        self.node_tokens.insert(node_token.clone(), node_id.clone());
                    }
                }
            }
            DomainEvent::NodeSuspended { node_id, .. } => {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    if node.status == NodeStatus::Active {
                        node.status = NodeStatus::Suspended;
                    }
                }
            }
            DomainEvent::NodeResumed { node_id } => {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    if node.status == NodeStatus::Suspended {
                        node.status = NodeStatus::Active;
                    }
                }
            }
            DomainEvent::NodeRevoked { node_id, public_key } => {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.status = NodeStatus::Revoked;
                    if self.hostname_index.get(&node.hostname) == Some(node_id) {
                        self.hostname_index.remove(&node.hostname);
                    }
                }
                // The token keeps resolving so the agent's next sync can
                // learn it is revoked; status gates every other use.
                self.blacklist.insert(public_key.clone());
            }
            DomainEvent::TrustScoreChanged { snapshot } => {
                if let Some(node) = self.nodes.get_mut(&snapshot.node_id) {
                    node.trust_score = snapshot.score;
                }
                let history = self.trust_history.entry(snapshot.node_id.clone()).or_default();
                history.push(snapshot.clone());
                if history.len() > TRUST_HISTORY_CAP {
                    let excess = history.len() - TRUST_HISTORY_CAP;
                    history.drain(..excess);
                }
            }

            DomainEvent::IpAllocated { address, owner_id, .. } => {
                self.allocations.insert(*address, owner_id.clone());
                self.released.remove(address);
            }
            DomainEvent::IpReleased { address, released_at_ms, .. } => {
                self.allocations.remove(address);
                self.released.insert(*address, *released_at_ms);
            }
            DomainEvent::IpamExhausted { pool } => {
                self.exhausted_at_ms.insert(pool.clone(), record.created_at_ms);
            }

            DomainEvent::UserCreated { user } | DomainEvent::UserUpdated { user } => {
                if let Some(old) = self.users.get(&user.id) {
                    self.email_index.remove(&old.email);
                }
                self.email_index.insert(user.email.clone(), user.id.clone());
                self.users.insert(user.id.clone(), user.clone());
            }
            DomainEvent::UserDeleted { user_id } => {
                if let Some(user) = self.users.remove(user_id) {
                    self.email_index.remove(&user.email);
                }
                for group in self.groups.values_mut() {
                    group.members.remove(user_id);
                }
            }

            DomainEvent::GroupCreated { group } | DomainEvent::GroupUpdated { group } => {
                if let Some(old) = self.groups.get(&group.id) {
                    self.group_name_index.remove(&old.name);
                }
                self.group_name_index.insert(group.name.clone(), group.id.clone());
                self.groups.insert(group.id.clone(), group.clone());
            }
            DomainEvent::GroupDeleted { group_id } => {
                if let Some(group) = self.groups.remove(group_id) {
                    self.group_name_index.remove(&group.name);
                }
            }
            DomainEvent::GroupMemberAdded { group_id, user_id } => {
                if let Some(group) = self.groups.get_mut(group_id) {
                    group.members.insert(user_id.clone());
                }
            }
            DomainEvent::GroupMemberRemoved { group_id, user_id } => {
                if let Some(group) = self.groups.get_mut(group_id) {
                    group.members.remove(user_id);
                }
            }

            DomainEvent::PolicyCreated { policy } | DomainEvent::PolicyUpdated { policy } => {
                self.policies.insert(policy.id.clone(), policy.clone());
            }
            DomainEvent::PolicyDeleted { policy_id } => {
                self.policies.remove(policy_id);
            }

            DomainEvent::NetworkPolicyCreated { policy } => {
                if !self.network_policies.contains_key(&policy.id) {
                    self.network_policy_order.push(policy.id.clone());
                }
                self.network_policies.insert(policy.id.clone(), policy.clone());
            }
            DomainEvent::NetworkPolicyUpdated { policy } => {
                if self.network_policies.contains_key(&policy.id) {
                    self.network_policies.insert(policy.id.clone(), policy.clone());
                }
            }
            DomainEvent::NetworkPolicyDeleted { policy_id } => {
                self.network_policies.remove(policy_id);
                self.network_policy_order.retain(|id| id != policy_id);
            }

            DomainEvent::DeviceCreated { device } => {
                self.config_tokens.insert(device.config_token.clone(), device.id.clone());
                self.devices.insert(device.id.clone(), device.clone());
            }
            DomainEvent::DeviceConfigRetrieved { device_id } => {
                if let Some(device) = self.devices.get_mut(device_id) {
                    device.token_consumed = true;
                }
            }
            DomainEvent::DeviceRevoked { device_id, .. } => {
                if let Some(device) = self.devices.get_mut(device_id) {
                    device.status = DeviceStatus::Revoked;
                    self.config_tokens.remove(&device.config_token);
                }
            }
        }
    }

    // -- node lookups ---------------------------------------------------------

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_by_hostname(&self, hostname: &str) -> Option<&Node> {
        self.hostname_index.get(hostname).and_then(|id| self.nodes.get(id))
    }

    pub fn node_by_token(&self, token: &str) -> Option<&Node> {
        self.node_tokens.get(token).and_then(|id| self.nodes.get(id))
    }

    /// The bearer token currently bound to a node, if approved.
    pub fn token_of_node(&self, node_id: &str) -> Option<&str> {
        self.node_tokens
            .iter()
            .find(|(_, id)| id.as_str() == node_id)
            .map(|(token, _)| token.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.status == NodeStatus::Active)
    }

    pub fn nodes_by_role(&self, role: NodeRole) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.role == role)
    }

    /// The hub node, if one has registered.
    pub fn hub_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.role == NodeRole::Hub && n.status == NodeStatus::Active)
    }

    pub fn key_blacklisted(&self, public_key: &str) -> bool {
        self.blacklist.contains(public_key)
    }

    pub fn trust_history(&self, node_id: &str) -> &[TrustSnapshot] {
        self.trust_history.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    // -- identity lookups -----------------------------------------------------

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    /// Resolve a subject string: user id first, then email.
    pub fn user_by_subject(&self, subject: &str) -> Option<&User> {
        self.users
            .get(subject)
            .or_else(|| self.email_index.get(subject).and_then(|id| self.users.get(id)))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.group_name_index.get(name).and_then(|id| self.groups.get(id))
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Ids of all groups containing the user.
    pub fn groups_of(&self, user_id: &str) -> Vec<&Group> {
        self.groups.values().filter(|g| g.members.contains(user_id)).collect()
    }

    // -- policy lookups -------------------------------------------------------

    pub fn policy(&self, id: &str) -> Option<&AccessPolicy> {
        self.policies.get(id)
    }

    pub fn policies(&self) -> impl Iterator<Item = &AccessPolicy> {
        self.policies.values()
    }

    pub fn network_policy(&self, id: &str) -> Option<&NetworkPolicy> {
        self.network_policies.get(id)
    }

    /// Network policies in insertion order.
    pub fn network_policies(&self) -> Vec<&NetworkPolicy> {
        self.network_policy_order
            .iter()
            .filter_map(|id| self.network_policies.get(id))
            .collect()
    }

    // -- device lookups -------------------------------------------------------

    pub fn device(&self, id: &str) -> Option<&ClientDevice> {
        self.devices.get(id)
    }

    pub fn device_by_token(&self, token: &str) -> Option<&ClientDevice> {
        self.config_tokens.get(token).and_then(|id| self.devices.get(id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &ClientDevice> {
        self.devices.values()
    }

    pub fn devices_of_user<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a ClientDevice> + 'a {
        self.devices.values().filter(move |d| d.user_id == user_id)
    }

    /// Devices that are active after expiry is applied.
    pub fn active_devices(&self, now_ms: u64) -> impl Iterator<Item = &ClientDevice> {
        self.devices.values().filter(move |d| d.effective_status(now_ms) == DeviceStatus::Active)
    }

    // -- ipam lookups ---------------------------------------------------------

    pub fn ip_allocated(&self, ip: Ipv4Addr) -> bool {
        self.allocations.contains_key(&ip)
    }

    pub fn ip_released_at(&self, ip: Ipv4Addr) -> Option<u64> {
        self.released.get(&ip).copied()
    }

    pub fn allocations(&self) -> &HashMap<Ipv4Addr, String> {
        &self.allocations
    }

    pub fn last_exhausted_at(&self, pool: &str) -> Option<u64> {
        self.exhausted_at_ms.get(pool).copied()
    }
}

#[cfg(test)]
#[path = "projection_tests.rs"]
mod tests;
