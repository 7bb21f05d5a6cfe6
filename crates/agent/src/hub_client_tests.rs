// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn backoff_doubles_with_jitter_and_caps() {
    let mut current = std::time::Duration::from_millis(500);
    for _ in 0..20 {
        let next = next_backoff(current);
        assert!(next >= current.min(MAX_BACKOFF), "never shrinks below the doubled base");
        assert!(next <= MAX_BACKOFF, "capped at 60s");
        current = next;
    }
    assert_eq!(current, MAX_BACKOFF);
}

#[tokio::test]
async fn register_maps_connection_failures_to_network_errors() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Nothing listens on this port.
    let client = HubClient::new("http://127.0.0.1:9", None).unwrap();
    let req = ztproto::api::RegisterRequest {
        hostname: "db-01".into(),
        role: ztproto::api::NodeRole::Db,
        public_key: "k".into(),
        real_ip: None,
        agent_version: "0.4.3".into(),
        os_info: "linux".into(),
        request_id: None,
    };
    match client.register(&req).await {
        Err(AgentError::Network(_)) => {}
        other => panic!("expected a network error, got {other:?}"),
    }
}
