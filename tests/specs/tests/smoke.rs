// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `zthub` binary and exercise
//! the agent protocol, the admin API, and the NDJSON event stream.

use std::time::Duration;

use futures_util::StreamExt;

use ztnet_specs::HubProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

fn wg_key(seed: u8) -> String {
    // A base64 32-byte key; not a real curve point, which the hub does not
    // need to verify.
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode([seed; 32])
}

fn admin_headers(hub: &HubProcess) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "x-admin-token",
        reqwest::header::HeaderValue::from_str(&hub.admin_secret).expect("header"),
    );
    headers
}

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let hub = HubProcess::start()?;
    hub.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", hub.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["node_count"], 0);
    Ok(())
}

#[tokio::test]
async fn register_approve_sync_roundtrip() -> anyhow::Result<()> {
    let hub = HubProcess::start()?;
    hub.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();
    let base = hub.base_url();

    // Register a pending node.
    let resp: serde_json::Value = client
        .post(format!("{base}/api/v1/agent/register"))
        .json(&serde_json::json!({
            "hostname": "db-01",
            "role": "db",
            "public_key": wg_key(1),
            "agent_version": "0.4.3",
            "os_info": "linux",
        }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["status"], "pending");
    let node_id = resp["node_id"].as_str().expect("node_id").to_owned();

    // Approve it through the admin API.
    let resp: serde_json::Value = client
        .post(format!("{base}/api/v1/admin/nodes/{node_id}/approve"))
        .headers(admin_headers(&hub))
        .send()
        .await?
        .json()
        .await?;
    let token = resp["node_token"].as_str().expect("token").to_owned();

    // Sync with the node token.
    let resp = client
        .post(format!("{base}/api/v1/agent/sync"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"node_id": node_id}))
        .send()
        .await?;
    assert!(resp.status().is_success());
    let plan: serde_json::Value = resp.json().await?;
    assert!(plan["plan_hash"].as_str().is_some());
    assert_eq!(plan["firewall_rules"].as_array().map(Vec::len), Some(1));

    // Unchanged plan short-circuits with 304.
    let resp = client
        .post(format!("{base}/api/v1/agent/sync"))
        .bearer_auth(&token)
        .header("if-none-match", plan["plan_hash"].as_str().unwrap_or_default())
        .json(&serde_json::json!({"node_id": node_id}))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_MODIFIED);
    Ok(())
}

#[tokio::test]
async fn event_stream_replays_and_pushes() -> anyhow::Result<()> {
    let hub = HubProcess::start()?;
    hub.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();
    let base = hub.base_url();

    // Produce a couple of events.
    for (hostname, seed) in [("db-01", 1u8), ("app-01", 2u8)] {
        client
            .post(format!("{base}/api/v1/agent/register"))
            .json(&serde_json::json!({
                "hostname": hostname,
                "role": "db",
                "public_key": wg_key(seed),
                "agent_version": "0.4.3",
                "os_info": "linux",
            }))
            .send()
            .await?
            .error_for_status()?;
    }

    // The stream replays committed events from the cursor.
    let resp = client
        .get(format!("{base}/api/v1/events"))
        .headers(admin_headers(&hub))
        .query(&[("since_id", "0")])
        .send()
        .await?
        .error_for_status()?;

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    let mut kinds = Vec::new();
    let deadline = tokio::time::Instant::now() + TIMEOUT;

    while kinds.len() < 3 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "stream replay timed out");
        let Some(chunk) = tokio::time::timeout(TIMEOUT, stream.next()).await? else {
            break;
        };
        buf.extend_from_slice(&chunk?);
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let frame: serde_json::Value = serde_json::from_slice(&line)?;
            if frame["id"].as_u64() != Some(0) {
                kinds.push(frame["type"].as_str().unwrap_or_default().to_owned());
            }
        }
    }

    assert!(kinds.contains(&"schema_migrated".to_owned()));
    assert!(kinds.contains(&"node_registered".to_owned()));
    assert!(kinds.contains(&"ip_allocated".to_owned()));
    Ok(())
}

#[tokio::test]
async fn state_survives_a_restart() -> anyhow::Result<()> {
    // Two hubs sharing one state dir, run in sequence.
    let state_dir = tempfile::tempdir()?;
    let client = reqwest::Client::new();

    let node_id;
    {
        let hub = HubProcess::start_with_state(state_dir.path())?;
        hub.wait_healthy(TIMEOUT).await?;
        let resp: serde_json::Value = client
            .post(format!("{}/api/v1/agent/register", hub.base_url()))
            .json(&serde_json::json!({
                "hostname": "db-01",
                "role": "db",
                "public_key": wg_key(1),
                "agent_version": "0.4.3",
                "os_info": "linux",
            }))
            .send()
            .await?
            .json()
            .await?;
        node_id = resp["node_id"].as_str().expect("node_id").to_owned();
    }

    let hub = HubProcess::start_with_state(state_dir.path())?;
    hub.wait_healthy(TIMEOUT).await?;
    let resp: serde_json::Value = client
        .get(format!("{}/api/v1/admin/nodes/{node_id}", hub.base_url()))
        .headers(admin_headers(&hub))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["hostname"], "db-01");
    assert_eq!(resp["status"], "pending");
    Ok(())
}
