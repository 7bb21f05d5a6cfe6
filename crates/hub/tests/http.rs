// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the hub HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use zthub::config::HubConfig;
use zthub::state::HubState;
use zthub::transport::build_router;

fn test_config() -> HubConfig {
    HubConfig {
        host: "127.0.0.1".into(),
        port: 0,
        admin_secret: None,
        secret_key: Some("test-master-secret".into()),
        overlay_network: "10.10.0.0/24".into(),
        wg_port: 51820,
        hub_endpoint: Some("203.0.113.1:51820".into()),
        node_pool_start: "10.10.0.2".parse().unwrap(),
        node_pool_end: "10.10.0.99".parse().unwrap(),
        client_pool_start: "10.10.0.100".parse().unwrap(),
        client_pool_end: "10.10.0.250".parse().unwrap(),
        client_default_expires_days: 1,
        client_max_devices_per_user: 2,
        client_dns: None,
        state_dir: None,
        auto_approve: false,
        heartbeat_interval_secs: 60,
        ip_cooldown_hours: 24,
        stream_keepalive_secs: 25,
    }
}

fn test_server(config: HubConfig) -> (Arc<HubState>, TestServer) {
    let state = HubState::open(config, CancellationToken::new()).expect("state");
    let server = TestServer::new(build_router(Arc::clone(&state))).expect("test server");
    (state, server)
}

fn wg_key(seed: u8) -> String {
    base64::engine::general_purpose::STANDARD.encode([seed; 32])
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
    )
}

fn register_body(hostname: &str, role: &str, seed: u8) -> serde_json::Value {
    serde_json::json!({
        "hostname": hostname,
        "role": role,
        "public_key": wg_key(seed),
        "real_ip": "198.51.100.9",
        "agent_version": "0.4.3",
        "os_info": "linux",
    })
}

/// Register and approve a node; returns `(node_id, node_token, overlay_ip)`.
async fn approved_node(server: &TestServer, hostname: &str, role: &str, seed: u8) -> (String, String, String) {
    let resp = server.post("/api/v1/agent/register").json(&register_body(hostname, role, seed)).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let node_id = body["node_id"].as_str().expect("node_id").to_owned();
    let overlay_ip = body["overlay_ip"].as_str().expect("overlay_ip").to_owned();

    let resp = server.post(&format!("/api/v1/admin/nodes/{node_id}/approve")).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let token = body["node_token"].as_str().expect("node_token").to_owned();
    (node_id, token, overlay_ip)
}

// -- health & auth ------------------------------------------------------------

#[tokio::test]
async fn health_reports_counts() {
    let (_state, server) = test_server(test_config());
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["node_count"], 0);
    // Schema stamp is the first event.
    assert_eq!(body["last_event_id"], 1);
}

#[tokio::test]
async fn admin_routes_require_the_shared_secret() {
    let mut config = test_config();
    config.admin_secret = Some("right-secret".into());
    let (_state, server) = test_server(config);

    let resp = server.get("/api/v1/admin/nodes").await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let resp = server
        .get("/api/v1/admin/nodes")
        .add_header(
            HeaderName::from_static("x-admin-token"),
            HeaderValue::from_static("wrong-secret"),
        )
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let resp = server
        .get("/api/v1/admin/nodes")
        .add_header(
            HeaderName::from_static("x-admin-token"),
            HeaderValue::from_static("right-secret"),
        )
        .await;
    resp.assert_status_ok();

    // Agent endpoints still demand a node token, not the admin secret.
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(
            HeaderName::from_static("x-admin-token"),
            HeaderValue::from_static("right-secret"),
        )
        .json(&serde_json::json!({"node_id": "x"}))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

// -- register -----------------------------------------------------------------

#[tokio::test]
async fn register_allocates_lowest_free_and_is_idempotent() {
    let (state, server) = test_server(test_config());

    let resp = server.post("/api/v1/agent/register").json(&register_body("db-01", "db", 1)).await;
    resp.assert_status_ok();
    let first: serde_json::Value = resp.json();
    assert_eq!(first["status"], "pending");
    assert_eq!(first["overlay_ip"], "10.10.0.2");

    let events_after_first = state.events_since(0).await.len();

    // Identical (hostname, public_key) → same node, no new event.
    let resp = server.post("/api/v1/agent/register").json(&register_body("db-01", "db", 1)).await;
    resp.assert_status_ok();
    let second: serde_json::Value = resp.json();
    assert_eq!(first["node_id"], second["node_id"]);
    assert_eq!(second["overlay_ip"], "10.10.0.2");
    assert_eq!(state.events_since(0).await.len(), events_after_first);

    // Same hostname, different key → conflict.
    let resp = server.post("/api/v1/agent/register").json(&register_body("db-01", "db", 2)).await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);

    // Different hostname gets the next address.
    let resp = server.post("/api/v1/agent/register").json(&register_body("app-01", "app", 3)).await;
    let third: serde_json::Value = resp.json();
    assert_eq!(third["overlay_ip"], "10.10.0.3");
}

#[tokio::test]
async fn register_validates_input() {
    let (_state, server) = test_server(test_config());

    let resp = server.post("/api/v1/agent/register").json(&register_body("-bad-", "db", 1)).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);

    let mut body = register_body("ok-host", "db", 1);
    body["public_key"] = serde_json::json!("tooshort");
    let resp = server.post("/api/v1/agent/register").json(&body).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // Hostnames are normalised before uniqueness checks.
    let resp = server.post("/api/v1/agent/register").json(&register_body("DB-02", "db", 4)).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let node_id = body["node_id"].as_str().unwrap();
    let resp = server.get(&format!("/api/v1/admin/nodes/{node_id}")).await;
    let view: serde_json::Value = resp.json();
    assert_eq!(view["hostname"], "db-02");
}

// -- approve & sync (scenario: approve and sync) ------------------------------

#[tokio::test]
async fn approve_then_sync_returns_a_minimal_plan() {
    let (_state, server) = test_server(test_config());
    let _hub = approved_node(&server, "hub-01", "hub", 9).await;
    let (db_id, db_token, db_ip) = approved_node(&server, "db-01", "db", 1).await;
    assert_eq!(db_ip, "10.10.0.2");

    // Sync without a token is rejected.
    let resp = server.post("/api/v1/agent/sync").json(&serde_json::json!({"node_id": db_id})).await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let (name, value) = bearer(&db_token);
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name.clone(), value.clone())
        .json(&serde_json::json!({"node_id": db_id}))
        .await;
    resp.assert_status_ok();
    let plan: serde_json::Value = resp.json();

    // Hub is the only peer; the chain is ESTABLISHED + default deny.
    assert_eq!(plan["peers"].as_array().unwrap().len(), 1);
    assert_eq!(plan["peers"][0]["allowed_ips"][0], "10.10.0.0/24");
    let rules = plan["firewall_rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["action"], "DROP");
    assert!(plan["directives"].as_array().unwrap().is_empty());

    // Unchanged state → 304 on the same hash.
    let hash = plan["plan_hash"].as_str().unwrap();
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name.clone(), value.clone())
        .add_header(
            HeaderName::from_static("if-none-match"),
            HeaderValue::from_str(hash).unwrap(),
        )
        .json(&serde_json::json!({"node_id": db_id}))
        .await;
    resp.assert_status(axum::http::StatusCode::NOT_MODIFIED);

    // Re-sync without the header returns the same hash.
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name, value)
        .json(&serde_json::json!({"node_id": db_id}))
        .await;
    let again: serde_json::Value = resp.json();
    assert_eq!(again["plan_hash"].as_str().unwrap(), hash);
}

#[tokio::test]
async fn pending_nodes_cannot_sync() {
    let (_state, server) = test_server(test_config());
    let resp = server.post("/api/v1/agent/register").json(&register_body("db-01", "db", 1)).await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "pending");
    assert!(body.get("node_token").is_none(), "no token before approval");
    // Without a token the agent cannot even authenticate; it polls register
    // idempotently until the token appears.
    let resp = server.post("/api/v1/agent/register").json(&register_body("db-01", "db", 1)).await;
    let body: serde_json::Value = resp.json();
    assert!(body.get("node_token").is_none());
}

// -- role-to-role firewall (scenario: role-to-role) ---------------------------

#[tokio::test]
async fn network_policy_compiles_to_exactly_one_allow() {
    let (_state, server) = test_server(test_config());
    let _hub = approved_node(&server, "hub-01", "hub", 9).await;
    let (db_id, db_token, _) = approved_node(&server, "db-01", "db", 1).await;
    let (_app_id, _app_token, app_ip) = approved_node(&server, "app-01", "app", 2).await;
    assert_eq!(app_ip, "10.10.0.3");

    let resp = server
        .post("/api/v1/admin/network-policies")
        .json(&serde_json::json!({
            "src_role": "app",
            "dst_role": "db",
            "protocol": "tcp",
            "port": "5432",
            "action": "ACCEPT",
            "priority": 100,
        }))
        .await;
    resp.assert_status_ok();

    let (name, value) = bearer(&db_token);
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name, value)
        .json(&serde_json::json!({"node_id": db_id}))
        .await;
    let plan: serde_json::Value = resp.json();
    let rules = plan["firewall_rules"].as_array().unwrap();

    let allows: Vec<&serde_json::Value> =
        rules.iter().filter(|r| r["action"] == "ACCEPT").collect();
    assert_eq!(allows.len(), 1);
    assert_eq!(allows[0]["src"], "10.10.0.3");
    assert_eq!(allows[0]["proto"], "tcp");
    assert_eq!(allows[0]["port"]["start"], 5432);
    assert_eq!(rules.last().unwrap()["action"], "DROP");
}

// -- group access (scenario: group-scoped allow) ------------------------------

#[tokio::test]
async fn group_scoped_access_evaluation() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/api/v1/access/users")
        .json(&serde_json::json!({"email": "u1@x", "display_name": "U One"}))
        .await;
    resp.assert_status_ok();
    let user: serde_json::Value = resp.json();
    let user_id = user["id"].as_str().unwrap();

    let resp = server
        .post("/api/v1/access/groups")
        .json(&serde_json::json!({"name": "eng"}))
        .await;
    let group: serde_json::Value = resp.json();
    let group_id = group["id"].as_str().unwrap();

    let resp = server
        .post(&format!("/api/v1/access/groups/{group_id}/members"))
        .json(&serde_json::json!({"user_id": user_id}))
        .await;
    resp.assert_status_ok();

    let resp = server
        .post("/api/v1/access/policies")
        .json(&serde_json::json!({
            "name": "eng-internal",
            "subject": {"type": "group", "id": "eng"},
            "resource": {"type": "domain", "value": "*.internal.example.com"},
            "action": "allow",
            "priority": 100,
        }))
        .await;
    resp.assert_status_ok();

    let eval = |subject: &str, resource: &str| {
        let server = &server;
        let subject = subject.to_owned();
        let resource = resource.to_owned();
        async move {
            let resp = server
                .post("/api/v1/access/evaluate")
                .json(&serde_json::json!({"subject": subject, "resource": resource}))
                .await;
            resp.assert_status_ok();
            let body: serde_json::Value = resp.json();
            body["allowed"].as_bool().unwrap()
        }
    };

    assert!(eval("u1@x", "api.internal.example.com").await);
    assert!(!eval("u1@x", "api.external.example.com").await);
    assert!(!eval("unknown@x", "api.internal.example.com").await);
}

// -- client devices (scenario: client provisioning) ---------------------------

#[tokio::test]
async fn device_provisioning_and_one_shot_delivery() {
    let (_state, server) = test_server(test_config());
    let (hub_id, hub_token, _) = approved_node(&server, "hub-01", "hub", 9).await;

    let resp = server
        .post("/api/v1/access/users")
        .json(&serde_json::json!({"email": "u1@x", "display_name": "U One"}))
        .await;
    let user: serde_json::Value = resp.json();
    let user_id = user["id"].as_str().unwrap();

    let resp = server
        .post("/api/v1/client/devices")
        .json(&serde_json::json!({
            "user_id": user_id,
            "name": "laptop",
            "device_type": "laptop",
            "tunnel_mode": "full",
            "expires_days": 1,
        }))
        .await;
    resp.assert_status_ok();
    let device: serde_json::Value = resp.json();
    assert_eq!(device["overlay_ip"], "10.10.0.100");
    assert!(device["private_key"].as_str().unwrap().len() > 40);
    let token = device["config_token"].as_str().unwrap().to_owned();
    let device_id = device["id"].as_str().unwrap().to_owned();

    // Full tunnel routes everything through the hub.
    assert!(device["profile"].as_str().unwrap().contains("AllowedIPs = 0.0.0.0/0"));

    // Token-addressed delivery, all three renderings.
    let resp = server.get(&format!("/api/v1/client/config/{token}")).await;
    resp.assert_status_ok();
    let cfg: serde_json::Value = resp.json();
    assert_eq!(cfg["device_id"], device_id.as_str());

    let resp = server.get(&format!("/api/v1/client/config/{token}/raw")).await;
    resp.assert_status_ok();
    assert!(resp.text().contains("[Interface]"));

    let resp = server.get(&format!("/api/v1/client/config/{token}/qr")).await;
    resp.assert_status_ok();
    assert!(!resp.text().is_empty());

    // The hub plan carries the device as a peer.
    let (name, value) = bearer(&hub_token);
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name.clone(), value.clone())
        .json(&serde_json::json!({"node_id": hub_id}))
        .await;
    let plan: serde_json::Value = resp.json();
    assert!(plan["peers"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["allowed_ips"][0] == "10.10.0.100/32"));

    // Revocation drops the device and frees the token.
    let resp = server.delete(&format!("/api/v1/client/devices/{device_id}")).await;
    resp.assert_status_ok();
    let resp = server.get(&format!("/api/v1/client/config/{token}")).await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);

    // And the hub's next plan no longer lists it.
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name, value)
        .json(&serde_json::json!({"node_id": hub_id}))
        .await;
    let plan: serde_json::Value = resp.json();
    assert!(!plan["peers"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["allowed_ips"][0] == "10.10.0.100/32"));

    let resp = server.get("/api/v1/client/devices").await;
    let list: Vec<serde_json::Value> = resp.json();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["status"], "revoked");
}

#[tokio::test]
async fn single_use_tokens_are_consumed() {
    let (_state, server) = test_server(test_config());
    let _hub = approved_node(&server, "hub-01", "hub", 9).await;
    let resp = server
        .post("/api/v1/access/users")
        .json(&serde_json::json!({"email": "u1@x", "display_name": "U One"}))
        .await;
    let user: serde_json::Value = resp.json();

    let resp = server
        .post("/api/v1/client/devices")
        .json(&serde_json::json!({
            "user_id": user["id"].as_str().unwrap(),
            "name": "phone",
            "device_type": "mobile",
            "single_use": true,
        }))
        .await;
    let device: serde_json::Value = resp.json();
    let token = device["config_token"].as_str().unwrap();

    let resp = server.get(&format!("/api/v1/client/config/{token}")).await;
    resp.assert_status_ok();
    let resp = server.get(&format!("/api/v1/client/config/{token}")).await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn device_limit_per_user_is_enforced() {
    let (_state, server) = test_server(test_config());
    let resp = server
        .post("/api/v1/access/users")
        .json(&serde_json::json!({"email": "u1@x", "display_name": "U One"}))
        .await;
    let user: serde_json::Value = resp.json();
    let user_id = user["id"].as_str().unwrap();

    for name in ["a", "b"] {
        let resp = server
            .post("/api/v1/client/devices")
            .json(&serde_json::json!({
                "user_id": user_id,
                "name": name,
                "device_type": "laptop",
            }))
            .await;
        resp.assert_status_ok();
    }
    let resp = server
        .post("/api/v1/client/devices")
        .json(&serde_json::json!({
            "user_id": user_id,
            "name": "c",
            "device_type": "laptop",
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
}

// -- trust demotion (scenario: trust demotion) --------------------------------

#[tokio::test]
async fn sustained_abuse_suspends_and_isolates() {
    let (_state, server) = test_server(test_config());
    let _hub = approved_node(&server, "hub-01", "hub", 9).await;
    let (app_id, app_token, _) = approved_node(&server, "app-01", "app", 2).await;

    let (name, value) = bearer(&app_token);
    let bad_metrics = serde_json::json!({
        "node_id": app_id,
        "metrics": {
            "uptime_secs": 3600,
            "ssh_failures": 50,
            "firewall_violations": 20,
        }
    });

    // An hour of bad heartbeats drives the score below critical.
    let mut suspended = false;
    for _ in 0..60 {
        let resp = server
            .post("/api/v1/agent/heartbeat")
            .add_header(name.clone(), value.clone())
            .json(&bad_metrics)
            .await;
        resp.assert_status_ok();

        let resp = server.get(&format!("/api/v1/admin/nodes/{app_id}")).await;
        let view: serde_json::Value = resp.json();
        if view["status"] == "suspended" {
            suspended = true;
            break;
        }
    }
    assert!(suspended, "critical trust must auto-suspend");

    // The next sync returns an isolate directive.
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name, value)
        .json(&serde_json::json!({"node_id": app_id}))
        .await;
    resp.assert_status_ok();
    let plan: serde_json::Value = resp.json();
    assert_eq!(plan["directives"][0]["directive"], "isolate");
    assert!(plan["peers"].as_array().unwrap().is_empty());

    // Trust history was recorded.
    let resp = server.get(&format!("/api/v1/admin/trust/{app_id}")).await;
    let history: Vec<serde_json::Value> = resp.json();
    assert!(!history.is_empty());
}

// -- revocation (scenario: revocation erases reachability) --------------------

#[tokio::test]
async fn revocation_erases_reachability_and_blacklists_the_key() {
    let (_state, server) = test_server(test_config());
    let _hub = approved_node(&server, "hub-01", "hub", 9).await;
    let (db_id, db_token, _) = approved_node(&server, "db-01", "db", 1).await;
    let (app_id, _app_token, app_ip) = approved_node(&server, "app-01", "app", 2).await;

    server
        .post("/api/v1/admin/network-policies")
        .json(&serde_json::json!({
            "src_role": "app", "dst_role": "db", "protocol": "tcp",
            "port": "5432", "action": "ACCEPT", "priority": 100,
        }))
        .await
        .assert_status_ok();

    let resp = server.post(&format!("/api/v1/admin/nodes/{app_id}/revoke")).await;
    resp.assert_status_ok();

    let (name, value) = bearer(&db_token);
    let resp = server
        .post("/api/v1/agent/sync")
        .add_header(name, value)
        .json(&serde_json::json!({"node_id": db_id}))
        .await;
    let plan: serde_json::Value = resp.json();
    assert!(!plan["peers"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["allowed_ips"][0] == format!("{app_ip}/32")));
    assert!(!plan["firewall_rules"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["src"] == app_ip));

    // The revoked key can never come back.
    let resp = server.post("/api/v1/agent/register").json(&register_body("app-02", "app", 2)).await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);

    // The hostname is free for a new key.
    let resp = server.post("/api/v1/agent/register").json(&register_body("app-01", "app", 7)).await;
    resp.assert_status_ok();
}

// -- lifecycle guards ---------------------------------------------------------

#[tokio::test]
async fn lifecycle_transitions_are_guarded() {
    let (_state, server) = test_server(test_config());
    let (node_id, _, _) = approved_node(&server, "db-01", "db", 1).await;

    // Approving twice conflicts.
    let resp = server.post(&format!("/api/v1/admin/nodes/{node_id}/approve")).await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);

    // Resume requires suspended.
    let resp = server.post(&format!("/api/v1/admin/nodes/{node_id}/resume")).await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);

    // Suspend, resume, revoke, and revoked is terminal.
    server.post(&format!("/api/v1/admin/nodes/{node_id}/suspend")).await.assert_status_ok();
    server.post(&format!("/api/v1/admin/nodes/{node_id}/resume")).await.assert_status_ok();
    server.post(&format!("/api/v1/admin/nodes/{node_id}/revoke")).await.assert_status_ok();
    let resp = server.post(&format!("/api/v1/admin/nodes/{node_id}/resume")).await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let resp = server.post(&format!("/api/v1/admin/nodes/{node_id}/revoke")).await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);

    // Unknown ids are 404.
    let resp = server.post("/api/v1/admin/nodes/nope/approve").await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
}
