// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node plan synthesis from the compiled policy planes.
//!
//! Spokes get the hub peer covering the whole overlay plus a `/32` peer for
//! every reachable active node; the hub gets everything, client devices
//! included. Output ordering is fully deterministic so the plan hash is
//! stable across compiles of unchanged state.

use std::net::Ipv4Addr;

use ztproto::api::{NodeRole, NodeStatus};
use ztproto::plan::{
    FirewallRule, InterfaceConfig, PeerConfig, Plan, Protocol, RuleAction,
};

use crate::config::HubConfig;
use crate::model::{epoch_ms, NetworkPolicy, Node};
use crate::policy::network_plane;
use crate::store::projection::Projection;
use crate::trust::{action_for, risk_level, TrustAction};

/// Priority of the synthesized default-deny row; sorts after everything.
pub const DEFAULT_DENY_PRIORITY: i32 = i32::MIN;

/// Keepalive pushed to spokes and client devices to hold NAT mappings.
const PERSISTENT_KEEPALIVE: u16 = 25;

/// Whether traffic from `src` role to `dst` role is admitted by the plane.
///
/// First matching rule wins. A portless DROP blocks the pair outright; a
/// port-scoped DROP only shadows those ports, so the scan continues.
pub fn role_reachable(plane: &[NetworkPolicy], src: NodeRole, dst: NodeRole) -> bool {
    for rule in plane {
        if rule.src_role != src || rule.dst_role != dst {
            continue;
        }
        match rule.action {
            RuleAction::Accept => return true,
            RuleAction::Drop => {
                if rule.port.is_none() {
                    return false;
                }
            }
        }
    }
    false
}

/// Peers exchange traffic if either direction is admitted.
fn peer_reachable(plane: &[NetworkPolicy], a: NodeRole, b: NodeRole) -> bool {
    role_reachable(plane, a, b) || role_reachable(plane, b, a)
}

/// The hub endpoint advertised to spokes: configured value, else the hub
/// node's registered real IP plus the WireGuard port.
pub fn hub_endpoint(config: &HubConfig, projection: &Projection) -> Option<String> {
    if let Some(ref endpoint) = config.hub_endpoint {
        return Some(endpoint.clone());
    }
    let hub = projection.hub_node()?;
    let real_ip = hub.real_ip.as_deref()?;
    Some(format!("{real_ip}:{}", config.wg_port))
}

fn interface_for(config: &HubConfig, node: &Node) -> InterfaceConfig {
    let (_, prefix) = config.overlay_cidr();
    let address = node
        .overlay_ip
        .map(|ip| format!("{ip}/{prefix}"))
        .unwrap_or_default();
    InterfaceConfig {
        address,
        private_key: None,
        listen_port: (node.role == NodeRole::Hub).then_some(config.wg_port),
        dns: None,
    }
}

/// Synthesize the plan for one node.
pub fn plan_for_node(config: &HubConfig, projection: &Projection, node: &Node) -> Plan {
    let plane = network_plane(projection);
    let now_ms = epoch_ms();

    let trust_action = action_for(risk_level(node.trust_score));
    let restricted = trust_action == TrustAction::Restrict;

    let mut peers: Vec<PeerConfig> = Vec::new();
    let mut rules: Vec<FirewallRule> = Vec::new();

    if node.role == NodeRole::Hub {
        // The hub terminates every spoke tunnel and carries client devices.
        let mut spokes: Vec<&Node> = projection
            .active_nodes()
            .filter(|n| n.id != node.id && n.overlay_ip.is_some())
            .collect();
        spokes.sort_by_key(|n| n.overlay_ip);
        for spoke in spokes {
            if let Some(ip) = spoke.overlay_ip {
                peers.push(PeerConfig {
                    public_key: spoke.public_key.clone(),
                    endpoint: None,
                    allowed_ips: vec![format!("{ip}/32")],
                    keepalive: None,
                });
            }
        }

        let mut devices: Vec<_> = projection.active_devices(now_ms).collect();
        devices.sort_by_key(|d| d.overlay_ip);
        for device in devices {
            peers.push(PeerConfig {
                public_key: device.public_key.clone(),
                endpoint: None,
                allowed_ips: vec![format!("{}/32", device.overlay_ip)],
                keepalive: None,
            });
        }
    } else {
        // Spoke posture: the hub peer covers the whole overlay.
        if let Some(hub) = projection.hub_node() {
            peers.push(PeerConfig {
                public_key: hub.public_key.clone(),
                endpoint: hub_endpoint(config, projection),
                allowed_ips: vec![config.overlay_network.clone()],
                keepalive: Some(PERSISTENT_KEEPALIVE),
            });
        }

        if !restricted {
            let mut reachable: Vec<&Node> = projection
                .active_nodes()
                .filter(|n| n.id != node.id && n.role != NodeRole::Hub && n.overlay_ip.is_some())
                .filter(|n| peer_reachable(&plane, node.role, n.role))
                .collect();
            reachable.sort_by_key(|n| n.overlay_ip);
            for other in reachable {
                if let Some(ip) = other.overlay_ip {
                    peers.push(PeerConfig {
                        public_key: other.public_key.clone(),
                        endpoint: None,
                        allowed_ips: vec![format!("{ip}/32")],
                        keepalive: None,
                    });
                }
            }
        }
    }

    // Inbound rules: the plane subset whose dst is this node, expanded per
    // source node. A restricted node keeps nothing but the default deny.
    if !restricted {
        for rule in plane.iter().filter(|r| r.dst_role == node.role) {
            if rule.action != RuleAction::Accept {
                continue;
            }
            let mut sources: Vec<&Node> = projection
                .active_nodes()
                .filter(|n| n.role == rule.src_role && n.id != node.id)
                .filter(|n| n.overlay_ip.is_some())
                .collect();
            sources.sort_by_key(|n| n.overlay_ip);
            for src in sources {
                let Some(src_ip) = src.overlay_ip else { continue };
                rules.push(FirewallRule {
                    src: src_ip.to_string(),
                    dst: None,
                    proto: rule.protocol,
                    port: rule.port,
                    action: RuleAction::Accept,
                    priority: rule.priority,
                });
            }
        }
    }

    rules.push(default_deny_rule());

    Plan { interface: interface_for(config, node), peers, firewall_rules: rules }
}

/// The explicit drop-all row closing every compiled rule set.
pub fn default_deny_rule() -> FirewallRule {
    FirewallRule {
        src: "any".to_owned(),
        dst: None,
        proto: Protocol::Any,
        port: None,
        action: RuleAction::Drop,
        priority: DEFAULT_DENY_PRIORITY,
    }
}

/// Overlay addresses of all assets that may appear in any peer list; used
/// by tests to assert revocation erases reachability.
pub fn active_overlay_ips(projection: &Projection, now_ms: u64) -> Vec<Ipv4Addr> {
    let mut ips: Vec<Ipv4Addr> = projection
        .nodes()
        .filter(|n| n.status == NodeStatus::Active)
        .filter_map(|n| n.overlay_ip)
        .chain(projection.active_devices(now_ms).map(|d| d.overlay_ip))
        .collect();
    ips.sort_unstable();
    ips
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
