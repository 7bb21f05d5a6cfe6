// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::{ClientDevice, DeviceType, Group, Node, TunnelMode, User};
use crate::store::event::{aggregate, DomainEvent, EventRecord};

fn record(id: u64, aggregate_type: &str, aggregate_id: &str, event: DomainEvent) -> EventRecord {
    EventRecord {
        id,
        aggregate_type: aggregate_type.to_owned(),
        aggregate_id: aggregate_id.to_owned(),
        aggregate_version: 1,
        event,
        actor: "test".to_owned(),
        request_id: None,
        created_at_ms: id * 1000,
    }
}

fn node(id: &str, hostname: &str, role: NodeRole, ip: &str) -> Node {
    Node {
        id: id.to_owned(),
        hostname: hostname.to_owned(),
        role,
        public_key: format!("key-{id}"),
        real_ip: None,
        overlay_ip: Some(ip.parse().unwrap()),
        status: NodeStatus::Pending,
        trust_score: 75,
        agent_version: "0.4.3".into(),
        os_info: "linux".into(),
        created_at_ms: 0,
        approved_by: None,
    }
}

fn device(id: &str, user: &str, ip: &str, expires_at_ms: u64) -> ClientDevice {
    ClientDevice {
        id: id.to_owned(),
        user_id: user.to_owned(),
        name: format!("dev-{id}"),
        device_type: DeviceType::Laptop,
        overlay_ip: ip.parse().unwrap(),
        tunnel_mode: TunnelMode::Split,
        status: crate::model::DeviceStatus::Active,
        created_at_ms: 0,
        expires_at_ms,
        public_key: format!("devkey-{id}"),
        sealed_private_key: "sealed".into(),
        config_token: format!("tok-{id}"),
        token_single_use: false,
        token_consumed: false,
    }
}

fn lifecycle_records() -> Vec<EventRecord> {
    vec![
        record(
            1,
            aggregate::NODE,
            "n1",
            DomainEvent::NodeRegistered { node: node("n1", "db-01", NodeRole::Db, "10.10.0.2") },
        ),
        record(
            2,
            aggregate::NODE,
            "n1",
            DomainEvent::NodeApproved {
                node_id: "n1".into(),
                approved_by: "admin".into(),
                node_token: "tok-n1".into(),
            },
        ),
        record(
            3,
            aggregate::NODE,
            "n2",
            DomainEvent::NodeRegistered { node: node("n2", "app-01", NodeRole::App, "10.10.0.3") },
        ),
    ]
}

#[test]
fn replay_is_deterministic() {
    let records = lifecycle_records();
    let a = Projection::rebuild(&records);
    let b = Projection::rebuild(&records);

    assert_eq!(a.applied_id, b.applied_id);
    assert_eq!(a.nodes().count(), b.nodes().count());
    for n in a.nodes() {
        let other = b.node(&n.id).unwrap();
        assert_eq!(n.status, other.status);
        assert_eq!(n.overlay_ip, other.overlay_ip);
        assert_eq!(n.hostname, other.hostname);
    }
}

#[test]
fn approval_activates_and_indexes_the_token() {
    let p = Projection::rebuild(&lifecycle_records());

    let n1 = p.node("n1").unwrap();
    assert_eq!(n1.status, NodeStatus::Active);
    assert_eq!(n1.approved_by.as_deref(), Some("admin"));
    assert_eq!(p.node_by_token("tok-n1").map(|n| n.id.as_str()), Some("n1"));
    assert_eq!(p.token_of_node("n1"), Some("tok-n1"));

    // n2 is still pending: no token, excluded from active set.
    assert_eq!(p.node("n2").unwrap().status, NodeStatus::Pending);
    assert_eq!(p.active_nodes().count(), 1);
}

#[test]
fn revocation_blacklists_and_frees_the_hostname() {
    let mut records = lifecycle_records();
    records.push(record(
        4,
        aggregate::NODE,
        "n1",
        DomainEvent::NodeRevoked { node_id: "n1".into(), public_key: "key-n1".into() },
    ));
    records.push(record(
        5,
        aggregate::IPAM,
        "10.10.0.2",
        DomainEvent::IpReleased {
            address: "10.10.0.2".parse().unwrap(),
            owner_id: "n1".into(),
            released_at_ms: 5000,
        },
    ));
    let p = Projection::rebuild(&records);

    assert_eq!(p.node("n1").unwrap().status, NodeStatus::Revoked);
    assert!(p.node_by_hostname("db-01").is_none(), "hostname is freed");
    assert!(p.key_blacklisted("key-n1"));
    // The token still resolves (sync must be able to report `revoked`),
    // but to a node whose status gates everything.
    assert_eq!(p.node_by_token("tok-n1").map(|n| n.status), Some(NodeStatus::Revoked));
    assert!(!p.ip_allocated("10.10.0.2".parse().unwrap()));
    assert_eq!(p.ip_released_at("10.10.0.2".parse().unwrap()), Some(5000));
}

#[test]
fn suspend_resume_cycle() {
    let mut records = lifecycle_records();
    records.push(record(
        4,
        aggregate::NODE,
        "n1",
        DomainEvent::NodeSuspended { node_id: "n1".into(), reason: "test".into() },
    ));
    let p = Projection::rebuild(&records);
    assert_eq!(p.node("n1").unwrap().status, NodeStatus::Suspended);

    records.push(record(5, aggregate::NODE, "n1", DomainEvent::NodeResumed { node_id: "n1".into() }));
    let p = Projection::rebuild(&records);
    assert_eq!(p.node("n1").unwrap().status, NodeStatus::Active);

    // Resume never applies to a revoked node.
    records.push(record(
        6,
        aggregate::NODE,
        "n1",
        DomainEvent::NodeRevoked { node_id: "n1".into(), public_key: "key-n1".into() },
    ));
    records.push(record(7, aggregate::NODE, "n1", DomainEvent::NodeResumed { node_id: "n1".into() }));
    let p = Projection::rebuild(&records);
    assert_eq!(p.node("n1").unwrap().status, NodeStatus::Revoked);
}

#[test]
fn group_membership_follows_events() {
    let user = User {
        id: "u1".into(),
        email: "u1@example.com".into(),
        display_name: "U One".into(),
        department: String::new(),
        enabled: true,
    };
    let group = Group {
        id: "g1".into(),
        name: "eng".into(),
        description: String::new(),
        members: Default::default(),
    };
    let records = vec![
        record(1, aggregate::USER, "u1", DomainEvent::UserCreated { user }),
        record(2, aggregate::GROUP, "g1", DomainEvent::GroupCreated { group }),
        record(
            3,
            aggregate::GROUP,
            "g1",
            DomainEvent::GroupMemberAdded { group_id: "g1".into(), user_id: "u1".into() },
        ),
    ];
    let p = Projection::rebuild(&records);
    assert!(p.group("g1").unwrap().members.contains("u1"));
    assert_eq!(p.groups_of("u1").len(), 1);
    assert_eq!(p.user_by_subject("u1@example.com").map(|u| u.id.as_str()), Some("u1"));

    // Deleting the user scrubs membership.
    let mut records = records;
    records.push(record(4, aggregate::USER, "u1", DomainEvent::UserDeleted { user_id: "u1".into() }));
    let p = Projection::rebuild(&records);
    assert!(p.group("g1").unwrap().members.is_empty());
    assert!(p.user_by_subject("u1@example.com").is_none());
}

#[test]
fn expired_devices_leave_the_active_set() {
    let records = vec![
        record(
            1,
            aggregate::DEVICE,
            "d1",
            DomainEvent::DeviceCreated { device: device("d1", "u1", "10.10.0.100", 10_000) },
        ),
        record(
            2,
            aggregate::DEVICE,
            "d2",
            DomainEvent::DeviceCreated { device: device("d2", "u1", "10.10.0.101", 99_000) },
        ),
    ];
    let p = Projection::rebuild(&records);

    assert_eq!(p.active_devices(5_000).count(), 2);
    let active: Vec<&str> = p.active_devices(50_000).map(|d| d.id.as_str()).collect();
    assert_eq!(active, vec!["d2"]);
    assert_eq!(p.device_by_token("tok-d1").map(|d| d.id.as_str()), Some("d1"));
}

#[test]
fn device_revocation_drops_the_config_token() {
    let mut records = vec![record(
        1,
        aggregate::DEVICE,
        "d1",
        DomainEvent::DeviceCreated { device: device("d1", "u1", "10.10.0.100", u64::MAX) },
    )];
    records.push(record(
        2,
        aggregate::DEVICE,
        "d1",
        DomainEvent::DeviceRevoked { device_id: "d1".into(), reason: "test".into() },
    ));
    let p = Projection::rebuild(&records);
    assert!(p.device_by_token("tok-d1").is_none());
    assert_eq!(p.active_devices(0).count(), 0);
}

#[test]
fn network_policy_order_is_insertion_order() {
    use crate::model::NetworkPolicy;
    use ztproto::plan::{Protocol, RuleAction};

    let mk = |id: &str| NetworkPolicy {
        id: id.to_owned(),
        src_role: NodeRole::App,
        dst_role: NodeRole::Db,
        protocol: Protocol::Tcp,
        port: None,
        action: RuleAction::Accept,
        priority: 0,
    };
    let records = vec![
        record(1, aggregate::NETWORK_POLICY, "b", DomainEvent::NetworkPolicyCreated { policy: mk("b") }),
        record(2, aggregate::NETWORK_POLICY, "a", DomainEvent::NetworkPolicyCreated { policy: mk("a") }),
        record(3, aggregate::NETWORK_POLICY, "c", DomainEvent::NetworkPolicyCreated { policy: mk("c") }),
        record(4, aggregate::NETWORK_POLICY, "b", DomainEvent::NetworkPolicyDeleted { policy_id: "b".into() }),
    ];
    let p = Projection::rebuild(&records);
    let order: Vec<&str> = p.network_policies().iter().map(|np| np.id.as_str()).collect();
    assert_eq!(order, vec!["a", "c"]);
}
