// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::{AccessAction, AccessPolicy, Group, NetworkPolicy, Resource, Subject, User};
use crate::store::event::{aggregate, DomainEvent, EventRecord};
use crate::store::projection::Projection;
use ztproto::api::NodeRole;
use ztproto::plan::RuleAction;

fn record(id: u64, aggregate_type: &str, aggregate_id: &str, event: DomainEvent) -> EventRecord {
    EventRecord {
        id,
        aggregate_type: aggregate_type.to_owned(),
        aggregate_id: aggregate_id.to_owned(),
        aggregate_version: 1,
        event,
        actor: "test".to_owned(),
        request_id: None,
        created_at_ms: 0,
    }
}

/// u1 is in group `eng`; u2 is directory-known but groupless.
fn identity_projection() -> Projection {
    let u1 = User {
        id: "u1".into(),
        email: "u1@x".into(),
        display_name: "U One".into(),
        department: "eng".into(),
        enabled: true,
    };
    let u2 = User {
        id: "u2".into(),
        email: "u2@x".into(),
        display_name: "U Two".into(),
        department: String::new(),
        enabled: true,
    };
    let eng = Group {
        id: "g-eng".into(),
        name: "eng".into(),
        description: String::new(),
        members: Default::default(),
    };
    let records = vec![
        record(1, aggregate::USER, "u1", DomainEvent::UserCreated { user: u1 }),
        record(2, aggregate::USER, "u2", DomainEvent::UserCreated { user: u2 }),
        record(3, aggregate::GROUP, "g-eng", DomainEvent::GroupCreated { group: eng }),
        record(
            4,
            aggregate::GROUP,
            "g-eng",
            DomainEvent::GroupMemberAdded { group_id: "g-eng".into(), user_id: "u1".into() },
        ),
    ];
    Projection::rebuild(&records)
}

fn with_policy(p: &mut Projection, id: u64, policy: AccessPolicy) {
    let policy_id = policy.id.clone();
    p.apply(&record(id, aggregate::POLICY, &policy_id, DomainEvent::PolicyCreated { policy }));
}

fn domain_policy(id: &str, subject: Subject, pattern: &str, action: AccessAction, priority: i32) -> AccessPolicy {
    AccessPolicy {
        id: id.to_owned(),
        name: id.to_owned(),
        subject,
        resource: Resource::Domain { pattern: pattern.to_owned() },
        action,
        priority,
        enabled: true,
    }
}

#[test]
fn domain_wildcards() {
    // `*.X` is exactly one extra label.
    assert!(domain_match("*.internal.example.com", "api.internal.example.com"));
    assert!(!domain_match("*.internal.example.com", "internal.example.com"));
    assert!(!domain_match("*.internal.example.com", "a.b.internal.example.com"));
    assert!(!domain_match("*.internal.example.com", "api.external.example.com"));

    // `**.X` is any depth.
    assert!(domain_match("**.example.com", "a.example.com"));
    assert!(domain_match("**.example.com", "a.b.c.example.com"));
    assert!(!domain_match("**.example.com", "example.com"));

    // Exact patterns match exactly.
    assert!(domain_match("db.example.com", "db.example.com"));
    assert!(!domain_match("db.example.com", "x.db.example.com"));

    // Suffix tricks do not match.
    assert!(!domain_match("*.example.com", "evilexample.com"));
    assert!(!domain_match("**.example.com", "evilexample.com"));
}

#[test]
fn group_scoped_allow_with_default_deny() {
    let mut p = identity_projection();
    with_policy(
        &mut p,
        10,
        domain_policy(
            "pol-eng",
            Subject::Group { id: "g-eng".into() },
            "*.internal.example.com",
            AccessAction::Allow,
            100,
        ),
    );

    let hit = evaluate_access(&p, "u1@x", "api.internal.example.com");
    assert!(hit.allowed);
    assert_eq!(hit.matched_policy_id.as_deref(), Some("pol-eng"));

    let miss = evaluate_access(&p, "u1@x", "api.external.example.com");
    assert!(!miss.allowed);
    assert!(miss.matched_policy_id.is_none());

    // Group membership is required, not just directory presence.
    let other = evaluate_access(&p, "u2@x", "api.internal.example.com");
    assert!(!other.allowed);

    let unknown = evaluate_access(&p, "nobody@x", "api.internal.example.com");
    assert!(!unknown.allowed);
    assert_eq!(unknown.reason, "unknown subject");
}

#[test]
fn higher_priority_wins_and_deny_wins_ties() {
    let mut p = identity_projection();
    with_policy(
        &mut p,
        10,
        domain_policy("allow-low", Subject::User { id: "u1".into() }, "**.example.com", AccessAction::Allow, 10),
    );
    with_policy(
        &mut p,
        11,
        domain_policy("deny-high", Subject::User { id: "u1".into() }, "**.example.com", AccessAction::Deny, 50),
    );
    let out = evaluate_access(&p, "u1", "a.example.com");
    assert!(!out.allowed);
    assert_eq!(out.matched_policy_id.as_deref(), Some("deny-high"));

    with_policy(
        &mut p,
        12,
        domain_policy("allow-tied", Subject::User { id: "u1".into() }, "**.example.com", AccessAction::Allow, 50),
    );
    let out = evaluate_access(&p, "u1", "a.example.com");
    assert!(!out.allowed, "deny wins a priority tie");
}

#[test]
fn disabled_policies_and_disabled_users_do_not_match() {
    let mut p = identity_projection();
    let mut policy = domain_policy(
        "pol-off",
        Subject::User { id: "u1".into() },
        "**.example.com",
        AccessAction::Allow,
        10,
    );
    policy.enabled = false;
    with_policy(&mut p, 10, policy);
    assert!(!evaluate_access(&p, "u1", "a.example.com").allowed);

    // Disable the user outright.
    let mut u1 = p.user("u1").unwrap().clone();
    u1.enabled = false;
    p.apply(&record(20, aggregate::USER, "u1", DomainEvent::UserUpdated { user: u1 }));
    with_policy(
        &mut p,
        21,
        domain_policy("pol-on", Subject::User { id: "u1".into() }, "**.example.com", AccessAction::Allow, 10),
    );
    let out = evaluate_access(&p, "u1", "a.example.com");
    assert!(!out.allowed);
    assert_eq!(out.reason, "subject disabled");
}

#[test]
fn non_domain_resources_match_by_kind() {
    use ztproto::plan::{PortRange, Protocol};
    let mut p = identity_projection();
    with_policy(
        &mut p,
        10,
        AccessPolicy {
            id: "pol-ip".into(),
            name: "overlay".into(),
            subject: Subject::User { id: "u1".into() },
            resource: Resource::OverlayIp { cidr: "10.10.0.0/24".into() },
            action: AccessAction::Allow,
            priority: 10,
            enabled: true,
        },
    );
    with_policy(
        &mut p,
        11,
        AccessPolicy {
            id: "pol-port".into(),
            name: "pg".into(),
            subject: Subject::User { id: "u1".into() },
            resource: Resource::Port { proto: Protocol::Tcp, range: PortRange::parse("5432").unwrap() },
            action: AccessAction::Allow,
            priority: 10,
            enabled: true,
        },
    );
    with_policy(
        &mut p,
        12,
        AccessPolicy {
            id: "pol-role".into(),
            name: "db-role".into(),
            subject: Subject::User { id: "u1".into() },
            resource: Resource::Role { name: "db".into() },
            action: AccessAction::Allow,
            priority: 10,
            enabled: true,
        },
    );

    assert!(evaluate_access(&p, "u1", "10.10.0.7").allowed);
    assert!(!evaluate_access(&p, "u1", "10.11.0.7").allowed);
    assert!(evaluate_access(&p, "u1", "tcp/5432").allowed);
    assert!(!evaluate_access(&p, "u1", "tcp/5433").allowed);
    assert!(!evaluate_access(&p, "u1", "udp/5432").allowed);
    assert!(evaluate_access(&p, "u1", "db").allowed);
    assert!(!evaluate_access(&p, "u1", "ops").allowed);
}

#[test]
fn network_plane_orders_by_priority_then_specificity() {
    use ztproto::plan::{PortRange, Protocol};

    let mk = |id: &str, port: Option<&str>, priority: i32| NetworkPolicy {
        id: id.to_owned(),
        src_role: NodeRole::App,
        dst_role: NodeRole::Db,
        protocol: Protocol::Tcp,
        port: port.map(|p| PortRange::parse(p).unwrap()),
        action: RuleAction::Accept,
        priority,
    };
    let records = vec![
        record(1, aggregate::NETWORK_POLICY, "any-port", DomainEvent::NetworkPolicyCreated { policy: mk("any-port", None, 10) }),
        record(2, aggregate::NETWORK_POLICY, "range", DomainEvent::NetworkPolicyCreated { policy: mk("range", Some("8000-9000"), 10) }),
        record(3, aggregate::NETWORK_POLICY, "exact", DomainEvent::NetworkPolicyCreated { policy: mk("exact", Some("5432"), 10) }),
        record(4, aggregate::NETWORK_POLICY, "urgent", DomainEvent::NetworkPolicyCreated { policy: mk("urgent", None, 99) }),
    ];
    let p = Projection::rebuild(&records);
    let order: Vec<String> = network_plane(&p).iter().map(|r| r.id.clone()).collect();
    assert_eq!(order, vec!["urgent", "exact", "range", "any-port"]);
}

#[test]
fn requested_resource_parsing() {
    assert_eq!(
        RequestedResource::parse("tcp/5432"),
        RequestedResource::Port { proto: ztproto::plan::Protocol::Tcp, port: 5432 }
    );
    assert_eq!(RequestedResource::parse("10.10.0.9"), RequestedResource::OverlayIp("10.10.0.9".parse().unwrap()));
    assert_eq!(RequestedResource::parse("db"), RequestedResource::Role("db".into()));
    assert_eq!(
        RequestedResource::parse("api.example.com"),
        RequestedResource::Domain("api.example.com".into())
    );
}
