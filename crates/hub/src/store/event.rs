// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain event definitions and the committed record envelope.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::model::{
    AccessPolicy, ClientDevice, Group, NetworkPolicy, Node, TrustSnapshot, User,
};

/// Aggregate namespaces used in `EventRecord::aggregate_type`.
pub mod aggregate {
    pub const NODE: &str = "node";
    pub const USER: &str = "user";
    pub const GROUP: &str = "group";
    pub const POLICY: &str = "policy";
    pub const NETWORK_POLICY: &str = "network_policy";
    pub const DEVICE: &str = "device";
    pub const IPAM: &str = "ipam";
    pub const SCHEMA: &str = "schema";
}

/// Every domain mutation, exactly one variant per accepted write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    SchemaMigrated { version: u32 },

    NodeRegistered { node: Node },
    NodeApproved { node_id: String, approved_by: String, node_token: String },
    NodeSuspended { node_id: String, reason: String },
    NodeResumed { node_id: String },
    NodeRevoked { node_id: String, public_key: String },
    TrustScoreChanged { snapshot: TrustSnapshot },

    IpAllocated { address: Ipv4Addr, pool: String, owner_id: String },
    IpReleased { address: Ipv4Addr, owner_id: String, released_at_ms: u64 },
    IpamExhausted { pool: String },

    UserCreated { user: User },
    UserUpdated { user: User },
    UserDeleted { user_id: String },

    GroupCreated { group: Group },
    GroupUpdated { group: Group },
    GroupDeleted { group_id: String },
    GroupMemberAdded { group_id: String, user_id: String },
    GroupMemberRemoved { group_id: String, user_id: String },

    PolicyCreated { policy: AccessPolicy },
    PolicyUpdated { policy: AccessPolicy },
    PolicyDeleted { policy_id: String },

    NetworkPolicyCreated { policy: NetworkPolicy },
    NetworkPolicyUpdated { policy: NetworkPolicy },
    NetworkPolicyDeleted { policy_id: String },

    DeviceCreated { device: ClientDevice },
    DeviceConfigRetrieved { device_id: String },
    DeviceRevoked { device_id: String, reason: String },
}

impl DomainEvent {
    /// Wire name of the variant, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaMigrated { .. } => "schema_migrated",
            Self::NodeRegistered { .. } => "node_registered",
            Self::NodeApproved { .. } => "node_approved",
            Self::NodeSuspended { .. } => "node_suspended",
            Self::NodeResumed { .. } => "node_resumed",
            Self::NodeRevoked { .. } => "node_revoked",
            Self::TrustScoreChanged { .. } => "trust_score_changed",
            Self::IpAllocated { .. } => "ip_allocated",
            Self::IpReleased { .. } => "ip_released",
            Self::IpamExhausted { .. } => "ipam_exhausted",
            Self::UserCreated { .. } => "user_created",
            Self::UserUpdated { .. } => "user_updated",
            Self::UserDeleted { .. } => "user_deleted",
            Self::GroupCreated { .. } => "group_created",
            Self::GroupUpdated { .. } => "group_updated",
            Self::GroupDeleted { .. } => "group_deleted",
            Self::GroupMemberAdded { .. } => "group_member_added",
            Self::GroupMemberRemoved { .. } => "group_member_removed",
            Self::PolicyCreated { .. } => "policy_created",
            Self::PolicyUpdated { .. } => "policy_updated",
            Self::PolicyDeleted { .. } => "policy_deleted",
            Self::NetworkPolicyCreated { .. } => "network_policy_created",
            Self::NetworkPolicyUpdated { .. } => "network_policy_updated",
            Self::NetworkPolicyDeleted { .. } => "network_policy_deleted",
            Self::DeviceCreated { .. } => "device_created",
            Self::DeviceConfigRetrieved { .. } => "device_config_retrieved",
            Self::DeviceRevoked { .. } => "device_revoked",
        }
    }

    /// Whether the event can change some node's compiled plan.
    ///
    /// Node subscribers on the event stream only receive these; secrets
    /// carried by other events never reach agents.
    pub fn affects_plans(&self) -> bool {
        matches!(
            self,
            Self::NodeRegistered { .. }
                | Self::NodeApproved { .. }
                | Self::NodeSuspended { .. }
                | Self::NodeResumed { .. }
                | Self::NodeRevoked { .. }
                | Self::TrustScoreChanged { .. }
                | Self::IpAllocated { .. }
                | Self::IpReleased { .. }
                | Self::NetworkPolicyCreated { .. }
                | Self::NetworkPolicyUpdated { .. }
                | Self::NetworkPolicyDeleted { .. }
                | Self::DeviceCreated { .. }
                | Self::DeviceRevoked { .. }
        )
    }
}

/// A committed event as it sits in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally monotonic id, assigned at commit.
    pub id: u64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// Per-aggregate version, increments by exactly 1 per accepted event.
    pub aggregate_version: u64,
    #[serde(flatten)]
    pub event: DomainEvent,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub created_at_ms: u64,
}

/// An event proposed for commit.
#[derive(Debug, Clone)]
pub struct ProposedEvent {
    pub aggregate_type: &'static str,
    pub aggregate_id: String,
    /// `None` skips the optimistic-concurrency check (single-writer paths).
    pub expected_version: Option<u64>,
    pub event: DomainEvent,
    pub actor: String,
    pub request_id: Option<String>,
}

impl ProposedEvent {
    pub fn new(aggregate_type: &'static str, aggregate_id: impl Into<String>, event: DomainEvent) -> Self {
        Self {
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            expected_version: None,
            event,
            actor: "system".to_owned(),
            request_id: None,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}
