// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiled per-node plans: interface parameters, peer list, firewall rules.
//!
//! A plan is the complete desired state for one node at a point in time.
//! Plans are value types — the hub compiles them from projection state, the
//! agent applies them to the kernel. `content_hash` gives both sides a
//! stable fingerprint for unchanged-sync short-circuiting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// WireGuard interface parameters for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Overlay address with prefix, e.g. `10.10.0.2/24`.
    pub address: String,
    /// Private key, present only in client-device profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
}

/// A single WireGuard peer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<u16>,
}

/// Transport protocol selector for firewall rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inclusive port range. A single port is `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Parse `"5432"` or `"8000-9000"`.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some((lo, hi)) = s.split_once('-') {
            let start = lo.trim().parse().ok()?;
            let end = hi.trim().parse().ok()?;
            if start > end {
                return None;
            }
            Some(Self { start, end })
        } else {
            s.trim().parse().ok().map(Self::single)
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Terminal action of a firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Accept,
    Drop,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
        }
    }
}

/// One compiled firewall rule, scoped to the node that receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Source selector: an overlay address, a CIDR, or `any`.
    pub src: String,
    /// Destination selector; omitted when the rule is already node-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    pub proto: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortRange>,
    pub action: RuleAction,
    pub priority: i32,
}

/// The complete desired state for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
    pub firewall_rules: Vec<FirewallRule>,
}

impl Plan {
    /// Stable content hash of the plan.
    ///
    /// Struct fields serialize in declaration order and the compiler emits
    /// peers and rules in a deterministic order, so the same projection
    /// state always produces the same hash.
    pub fn content_hash(&self) -> String {
        use fmt::Write;
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(64);
        for b in digest {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
