// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample_plan() -> Plan {
    Plan {
        interface: InterfaceConfig {
            address: "10.10.0.2/24".into(),
            private_key: None,
            listen_port: Some(51820),
            dns: None,
        },
        peers: vec![PeerConfig {
            public_key: "hubkey".into(),
            endpoint: Some("203.0.113.1:51820".into()),
            allowed_ips: vec!["10.10.0.0/24".into()],
            keepalive: Some(25),
        }],
        firewall_rules: vec![
            FirewallRule {
                src: "10.10.0.3".into(),
                dst: None,
                proto: Protocol::Tcp,
                port: Some(PortRange::single(5432)),
                action: RuleAction::Accept,
                priority: 100,
            },
            FirewallRule {
                src: "any".into(),
                dst: None,
                proto: Protocol::Any,
                port: None,
                action: RuleAction::Drop,
                priority: i32::MIN,
            },
        ],
    }
}

#[test]
fn content_hash_is_stable() {
    let a = sample_plan();
    let b = sample_plan();
    assert_eq!(a.content_hash(), b.content_hash());
    assert_eq!(a.content_hash().len(), 64);
}

#[test]
fn content_hash_tracks_changes() {
    let a = sample_plan();
    let mut b = sample_plan();
    b.peers[0].endpoint = Some("203.0.113.2:51820".into());
    assert_ne!(a.content_hash(), b.content_hash());
}

#[test]
fn port_range_parse_and_display() {
    let single = PortRange::parse("5432").unwrap();
    assert!(single.is_single());
    assert_eq!(single.to_string(), "5432");

    let range = PortRange::parse("8000-9000").unwrap();
    assert_eq!(range.start, 8000);
    assert_eq!(range.end, 9000);
    assert_eq!(range.to_string(), "8000-9000");
    assert!(range.contains(8500));
    assert!(!range.contains(9001));

    assert!(PortRange::parse("9000-8000").is_none());
    assert!(PortRange::parse("x").is_none());
}

#[test]
fn sync_response_flattens_plan() {
    let resp = crate::api::SyncResponse {
        plan_hash: "abc".into(),
        plan: sample_plan(),
        directives: vec![],
    };
    let v = serde_json::to_value(&resp).unwrap();
    assert_eq!(v["plan_hash"], "abc");
    assert!(v["interface"]["address"].is_string());
    assert!(v["peers"].is_array());
    assert!(v["firewall_rules"].is_array());
}

#[test]
fn directive_wire_format() {
    let d = crate::api::Directive::RotateKeyBy { deadline_ms: 123 };
    let v = serde_json::to_value(&d).unwrap();
    assert_eq!(v["directive"], "rotate_key_by");
    assert_eq!(v["deadline_ms"], 123);

    let iso: crate::api::Directive =
        serde_json::from_value(serde_json::json!({"directive": "isolate"})).unwrap();
    assert_eq!(iso, crate::api::Directive::Isolate);
}
