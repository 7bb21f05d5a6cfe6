// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response bodies for the agent protocol and the event stream.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::Plan;

/// Overlay role of a node. Ordering here is documentation only; the trust
/// engine carries its own weight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Hub,
    App,
    Db,
    Ops,
    Monitor,
    Gateway,
    Client,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::App => "app",
            Self::Db => "db",
            Self::Ops => "ops",
            Self::Monitor => "monitor",
            Self::Gateway => "gateway",
            Self::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hub" => Some(Self::Hub),
            "app" => Some(Self::App),
            "db" => Some(Self::Db),
            "ops" => Some(Self::Ops),
            "monitor" => Some(Self::Monitor),
            "gateway" => Some(Self::Gateway),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Active,
    Suspended,
    Revoked,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- register -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub role: NodeRole,
    /// 32-byte WireGuard public key, base64.
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_ip: Option<String>,
    pub agent_version: String,
    pub os_info: String,
    /// Client-supplied idempotency key. Re-submitting the same request id
    /// for the same hostname returns the original result without a new event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub node_id: String,
    pub status: NodeStatus,
    pub overlay_ip: String,
    pub hub_public_key: String,
    pub hub_endpoint: String,
    pub server_time_ms: u64,
    /// Bearer token for subsequent agent calls. Present once the node is
    /// approved; pending nodes poll register until it appears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_token: Option<String>,
}

// -- sync ---------------------------------------------------------------------

/// Device posture reported on every sync; feeds the trust engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub patch_age_days: u32,
    #[serde(default)]
    pub suspicious_process: bool,
    #[serde(default)]
    pub agent_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub node_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

/// Out-of-band instructions carried alongside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    /// Rotate the WireGuard key and re-register before the deadline.
    RotateKeyBy { deadline_ms: u64 },
    /// Discard local identity and register from scratch.
    Reenroll,
    /// Tear down the tunnel and firewall chain, then idle.
    Isolate,
    /// Tear down and exit.
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub plan_hash: String,
    #[serde(flatten)]
    pub plan: Plan,
    #[serde(default)]
    pub directives: Vec<Directive>,
}

// -- heartbeat ----------------------------------------------------------------

/// Liveness metrics; every field is an input to the trust engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatMetrics {
    #[serde(default)]
    pub uptime_secs: u64,
    /// Seconds since the most recent WireGuard handshake with the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_age_secs: Option<u64>,
    #[serde(default)]
    pub ssh_failures: u32,
    #[serde(default)]
    pub firewall_violations: u32,
    #[serde(default)]
    pub traffic_anomaly: bool,
    #[serde(default)]
    pub patch_age_days: u32,
    #[serde(default)]
    pub suspicious_process: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    #[serde(default)]
    pub metrics: HeartbeatMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ack: bool,
    pub next_interval_secs: u64,
}

// -- evaluate -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    /// User external id or email.
    pub subject: String,
    /// Resource string: a domain, overlay ip, `proto/port`, or role name.
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub allowed: bool,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_policy_id: Option<String>,
    pub reason: String,
}

// -- event stream -------------------------------------------------------------

/// One newline-delimited JSON frame on `GET /api/v1/events`.
///
/// `id = 0` frames are keepalive pings and carry no payload; consumers must
/// not advance their cursor on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl StreamFrame {
    pub fn ping() -> Self {
        Self { id: 0, kind: "ping".to_owned(), payload: serde_json::Value::Null }
    }
}
