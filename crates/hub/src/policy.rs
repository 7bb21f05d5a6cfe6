// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy compilation: the role-to-role network plane and the
//! user/group-to-resource access plane.
//!
//! Both planes are pure functions over the projection. The network plane
//! orders rules by priority, then specificity, then insertion order, and is
//! always closed by an implicit drop-all. The access plane resolves the
//! subject through group membership, picks the highest-priority matching
//! rule, and falls through to deny.

use std::net::Ipv4Addr;

use ztproto::api::EvaluateResponse;
use ztproto::plan::{PortRange, Protocol};

use crate::config::{cidr_contains, parse_cidr};
use crate::model::{AccessAction, AccessPolicy, NetworkPolicy, Resource, Subject};
use crate::store::projection::Projection;

// -- network plane ------------------------------------------------------------

/// Port specificity rank: exact port > port range > any port.
fn port_specificity(port: &Option<PortRange>) -> u8 {
    match port {
        Some(r) if r.is_single() => 2,
        Some(_) => 1,
        None => 0,
    }
}

/// The compiled network plane: all policies in evaluation order.
///
/// `projection.network_policies()` yields insertion order, which the stable
/// sort preserves as the final tie-break.
pub fn network_plane(projection: &Projection) -> Vec<NetworkPolicy> {
    let mut rules: Vec<NetworkPolicy> =
        projection.network_policies().into_iter().cloned().collect();
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| port_specificity(&b.port).cmp(&port_specificity(&a.port)))
    });
    rules
}

// -- access plane -------------------------------------------------------------

/// Wildcard domain match.
///
/// `*.X` matches hosts ending in `.X` with exactly one extra label;
/// `**.X` matches any extra depth; anything else is an exact match.
pub fn domain_match(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("**.") {
        return host
            .strip_suffix(suffix)
            .map(|head| head.ends_with('.') && head.len() > 1)
            .unwrap_or(false);
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return match host.strip_suffix(suffix) {
            Some(head) if head.ends_with('.') && head.len() > 1 => {
                // Exactly one extra label: no further dot in the head.
                !head[..head.len() - 1].contains('.')
            }
            _ => false,
        };
    }
    pattern == host
}

/// The access side of an `evaluate` call, parsed from the resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedResource {
    Domain(String),
    OverlayIp(Ipv4Addr),
    Port { proto: Protocol, port: u16 },
    Role(String),
}

impl RequestedResource {
    /// Parse `api.internal.example.com`, `10.10.0.7`, `tcp/5432`, or `db`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((proto, port)) = raw.split_once('/') {
            if let (Some(proto), Ok(port)) = (parse_protocol(proto), port.parse::<u16>()) {
                return Self::Port { proto, port };
            }
        }
        if let Ok(ip) = raw.parse::<Ipv4Addr>() {
            return Self::OverlayIp(ip);
        }
        if ztproto::api::NodeRole::parse(raw).is_some() {
            return Self::Role(raw.to_owned());
        }
        Self::Domain(raw.to_owned())
    }
}

fn parse_protocol(s: &str) -> Option<Protocol> {
    match s {
        "tcp" => Some(Protocol::Tcp),
        "udp" => Some(Protocol::Udp),
        "icmp" => Some(Protocol::Icmp),
        "any" => Some(Protocol::Any),
        _ => None,
    }
}

fn resource_matches(policy: &Resource, requested: &RequestedResource) -> bool {
    match (policy, requested) {
        (Resource::Domain { pattern }, RequestedResource::Domain(host)) => {
            domain_match(pattern, host)
        }
        (Resource::OverlayIp { cidr }, RequestedResource::OverlayIp(ip)) => {
            match parse_cidr(cidr) {
                Some(net) => cidr_contains(net, *ip),
                None => cidr.parse::<Ipv4Addr>().map(|a| a == *ip).unwrap_or(false),
            }
        }
        (Resource::Port { proto, range }, RequestedResource::Port { proto: req_proto, port }) => {
            (*proto == Protocol::Any || proto == req_proto) && range.contains(*port)
        }
        (Resource::Role { name }, RequestedResource::Role(requested)) => name == requested,
        _ => false,
    }
}

fn subject_matches(projection: &Projection, subject: &Subject, user_id: &str) -> bool {
    match subject {
        Subject::User { id } => id == user_id,
        Subject::Group { id } => {
            projection.group(id).map(|g| g.members.contains(user_id)).unwrap_or(false)
        }
    }
}

/// Evaluate `(subject, resource)` against the access plane.
///
/// Unknown subjects and unmatched resources both fall through to deny. On a
/// priority tie, deny wins.
pub fn evaluate_access(projection: &Projection, subject: &str, resource: &str) -> EvaluateResponse {
    let Some(user) = projection.user_by_subject(subject) else {
        return EvaluateResponse {
            allowed: false,
            action: "deny".to_owned(),
            matched_policy_id: None,
            reason: "unknown subject".to_owned(),
        };
    };
    if !user.enabled {
        return EvaluateResponse {
            allowed: false,
            action: "deny".to_owned(),
            matched_policy_id: None,
            reason: "subject disabled".to_owned(),
        };
    }

    let requested = RequestedResource::parse(resource);

    let mut best: Option<&AccessPolicy> = None;
    for policy in projection.policies() {
        if !policy.enabled {
            continue;
        }
        if !subject_matches(projection, &policy.subject, &user.id) {
            continue;
        }
        if !resource_matches(&policy.resource, &requested) {
            continue;
        }
        best = match best {
            None => Some(policy),
            Some(current) if policy.priority > current.priority => Some(policy),
            Some(current)
                if policy.priority == current.priority
                    && policy.action == AccessAction::Deny =>
            {
                Some(policy)
            }
            Some(current) => Some(current),
        };
    }

    match best {
        Some(policy) => {
            let allowed = policy.action == AccessAction::Allow;
            EvaluateResponse {
                allowed,
                action: if allowed { "allow" } else { "deny" }.to_owned(),
                matched_policy_id: Some(policy.id.clone()),
                reason: format!("matched policy {}", policy.name),
            }
        }
        None => EvaluateResponse {
            allowed: false,
            action: "deny".to_owned(),
            matched_policy_id: None,
            reason: "no matching policy".to_owned(),
        },
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
