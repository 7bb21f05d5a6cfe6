// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain aggregates held in the projection.
//!
//! All cross-aggregate references are by id; resolution happens in the
//! projection at read time, so no ownership cycles exist between users,
//! groups, and policies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use ztproto::api::{NodeRole, NodeStatus};
use ztproto::plan::{PortRange, Protocol, RuleAction};

/// A registered overlay node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    pub role: NodeRole,
    /// 32-byte WireGuard public key, base64.
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_ip: Option<Ipv4Addr>,
    pub status: NodeStatus,
    pub trust_score: u8,
    pub agent_version: String,
    pub os_info: String,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

/// A directory user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub department: String,
    pub enabled: bool,
}

/// A named group of users. Membership is a set of user ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

/// Who a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subject {
    User { id: String },
    Group { id: String },
}

/// What a policy grants or denies access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    /// A hostname pattern. `*.X` matches one extra label; `**.X` matches any.
    Domain { pattern: String },
    /// An overlay address or CIDR.
    OverlayIp { cidr: String },
    /// A protocol + port range.
    Port { proto: Protocol, range: PortRange },
    /// A node role by name.
    Role { name: String },
}

/// Allow/deny verdict of an access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    Allow,
    Deny,
}

/// A user/group-to-resource access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: String,
    pub name: String,
    pub subject: Subject,
    pub resource: Resource,
    pub action: AccessAction,
    /// Higher wins.
    pub priority: i32,
    pub enabled: bool,
}

/// A role-to-role firewall policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub id: String,
    pub src_role: NodeRole,
    pub dst_role: NodeRole,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortRange>,
    pub action: RuleAction,
    pub priority: i32,
}

/// Form factor of a provisioned client device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Laptop,
}

/// Routing posture of a client-device tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelMode {
    /// All traffic through the hub (NAT egress).
    Full,
    /// Overlay traffic only.
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Revoked,
}

/// A provisioned end-user device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDevice {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub overlay_ip: Ipv4Addr,
    pub tunnel_mode: TunnelMode,
    pub status: DeviceStatus,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    /// Device WireGuard public key, base64.
    pub public_key: String,
    /// Device private key, AEAD-sealed under the master secret.
    pub sealed_private_key: String,
    pub config_token: String,
    /// Single-use tokens are consumed on first retrieval.
    pub token_single_use: bool,
    pub token_consumed: bool,
}

impl ClientDevice {
    /// Status with expiry applied — an expired device reads as revoked.
    pub fn effective_status(&self, now_ms: u64) -> DeviceStatus {
        if self.status == DeviceStatus::Revoked || self.expires_at_ms <= now_ms {
            DeviceStatus::Revoked
        } else {
            DeviceStatus::Active
        }
    }
}

/// One trust-engine evaluation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub node_id: String,
    pub score: u8,
    pub previous: u8,
    pub risk: crate::trust::RiskLevel,
    pub action: crate::trust::TrustAction,
    pub calculated_at_ms: u64,
    pub inputs: crate::trust::TrustInputs,
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Validate and normalise a hostname: lowercase, digits, hyphens, ≤63 chars,
/// no leading/trailing hyphen.
pub fn normalize_hostname(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase().replace(['_', ' '], "-");
    if name.is_empty() || name.len() > 63 {
        return None;
    }
    if name.starts_with('-') || name.ends_with('-') {
        return None;
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return None;
    }
    Some(name)
}

/// Validate a base64-encoded 32-byte WireGuard key.
pub fn valid_wg_key(key: &str) -> bool {
    use base64::Engine;
    match base64::engine::general_purpose::STANDARD.decode(key) {
        Ok(bytes) => bytes.len() == 32,
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
