// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The enforcement loop: the single writer for the tunnel interface and
//! the firewall chain.
//!
//! Each tick (or push nudge) syncs against the hub with the last applied
//! plan hash, applies any new plan by reconciling peers in place and
//! atomically swapping the firewall chain, then persists the hash. A plan
//! arriving mid-apply waits for the current swap; the loop never leaves the
//! kernel in a mixed state.

pub mod firewall;
pub mod wireguard;

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ztproto::api::{Directive, DeviceInfo, NodeRole, RegisterRequest, SyncResponse};
use ztproto::plan::Plan;

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::hub_client::{next_backoff, HubClient, SyncOutcome};
use crate::identity::NodeIdentity;
use crate::metrics;

use firewall::FirewallChain;
use wireguard::WgInterface;

const APPLIED_PLAN_FILE: &str = "applied_plan.json";

/// The last successfully applied plan, persisted across restarts so the
/// three-way diff survives a process bounce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedPlan {
    pub hash: String,
    pub plan: Plan,
}

pub fn load_applied(state_dir: &Path) -> Option<AppliedPlan> {
    let path = state_dir.join(APPLIED_PLAN_FILE);
    std::fs::read_to_string(path).ok().and_then(|c| serde_json::from_str(&c).ok())
}

pub fn persist_applied(state_dir: &Path, applied: &AppliedPlan) -> AgentResult<()> {
    let path = state_dir.join(APPLIED_PLAN_FILE);
    let contents = serde_json::to_string_pretty(applied)
        .map_err(|e| AgentError::Internal(format!("serialize applied plan: {e}")))?;
    std::fs::write(&path, contents)
        .map_err(|e| AgentError::Config(format!("write {}: {e}", path.display())))
}

/// Run a host command, returning stdout. Non-zero exit is an error with
/// the captured stderr.
pub(crate) async fn run_cmd(program: &str, args: &[&str]) -> AgentResult<String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| AgentError::Config(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::Internal(format!(
            "{program} {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The agent's single-writer reconcile loop.
pub struct EnforcementLoop {
    config: AgentConfig,
    identity: NodeIdentity,
    client: HubClient,
    wg: WgInterface,
    fw: FirewallChain,
    applied: Option<AppliedPlan>,
    /// Set after an isolate/revoke teardown; enforcement idles until the
    /// hub hands out a plan again.
    isolated: bool,
    started: Instant,
    last_dropped: u64,
    shutdown: CancellationToken,
}

/// Why the loop exited.
#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    Shutdown,
    /// Keep the keypair; drop the node id and token, register again.
    Reenroll,
    /// Discard the whole identity and mint a fresh keypair first.
    Rotate,
}

impl EnforcementLoop {
    pub fn new(
        config: AgentConfig,
        identity: NodeIdentity,
        client: HubClient,
        shutdown: CancellationToken,
    ) -> Self {
        let wg = WgInterface::new(&config.interface);
        let fw = FirewallChain::new(&config.interface);
        let applied = load_applied(&config.state_dir);
        Self {
            config,
            identity,
            client,
            wg,
            fw,
            applied,
            isolated: false,
            started: Instant::now(),
            last_dropped: 0,
            shutdown,
        }
    }

    /// Register with the hub until approved, persisting the node id and
    /// token as they arrive. Retries transient errors with capped backoff;
    /// permanent rejections abort.
    pub async fn enroll(&mut self) -> AgentResult<()> {
        let hostname = self
            .config
            .resolved_hostname()
            .ok_or_else(|| AgentError::Config("cannot determine hostname".to_owned()))?;
        let role = NodeRole::parse(&self.config.role)
            .ok_or_else(|| AgentError::Config(format!("unknown role {}", self.config.role)))?;

        let request = RegisterRequest {
            hostname,
            role,
            public_key: self.identity.public_key.clone(),
            real_ip: self.config.real_ip.clone(),
            agent_version: env!("CARGO_PKG_VERSION").to_owned(),
            os_info: os_info(),
            request_id: None,
        };

        let mut backoff = std::time::Duration::from_millis(500);
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.client.register(&request).await {
                Ok(resp) => {
                    if self.identity.node_id.as_deref() != Some(resp.node_id.as_str()) {
                        self.identity.node_id = Some(resp.node_id.clone());
                        self.identity.persist(&self.config.state_dir)?;
                    }
                    if let Some(token) = resp.node_token {
                        self.identity.node_token = Some(token.clone());
                        self.identity.persist(&self.config.state_dir)?;
                        self.client.set_token(Some(token));
                        tracing::info!(
                            node = %resp.node_id,
                            overlay_ip = %resp.overlay_ip,
                            "enrolled and approved"
                        );
                        return Ok(());
                    }
                    tracing::info!(
                        node = %resp.node_id,
                        status = %resp.status,
                        "registered, waiting for approval"
                    );
                }
                Err(e @ (AgentError::Conflict(_) | AgentError::Auth(_))) => return Err(e),
                Err(e) => {
                    tracing::warn!(err = %e, "register failed, retrying in {backoff:?}");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
            backoff = next_backoff(backoff);
        }
    }

    /// Run until shutdown. Handles reenroll directives by clearing local
    /// enrollment and registering again.
    pub async fn run(mut self) -> AgentResult<()> {
        loop {
            if self.identity.node_token.is_none() {
                self.enroll().await?;
            } else {
                self.client.set_token(self.identity.node_token.clone());
            }
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            match self.drive().await? {
                LoopExit::Shutdown => {
                    self.teardown().await;
                    return Ok(());
                }
                LoopExit::Reenroll => {
                    self.teardown().await;
                    self.identity.clear_enrollment(&self.config.state_dir)?;
                    self.client.set_token(None);
                    self.applied = None;
                    continue;
                }
                LoopExit::Rotate => {
                    self.teardown().await;
                    self.identity = NodeIdentity::regenerate(&self.config.state_dir)?;
                    self.client.set_token(None);
                    self.applied = None;
                    continue;
                }
            }
        }
    }

    /// The sync/heartbeat loop for one enrollment.
    async fn drive(&mut self) -> AgentResult<LoopExit> {
        let (nudge_tx, mut nudge_rx) = tokio::sync::mpsc::channel::<()>(1);
        spawn_stream_listener(
            &self.config,
            self.identity.node_token.clone(),
            nudge_tx,
            self.shutdown.clone(),
        );

        let mut tick = tokio::time::interval(self.config.sync_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(LoopExit::Shutdown),
                _ = tick.tick() => {}
                _ = nudge_rx.recv() => {
                    tracing::debug!("plan change pushed, syncing early");
                }
            }

            match self.sync_once().await {
                Ok(Some(exit)) => return Ok(exit),
                Ok(None) => {}
                Err(e @ (AgentError::Network(_) | AgentError::Internal(_))) => {
                    tracing::warn!(err = %e, "sync failed, will retry");
                }
                Err(AgentError::Auth(msg)) => {
                    tracing::warn!(%msg, "token rejected, re-enrolling");
                    return Ok(LoopExit::Reenroll);
                }
                Err(e) => return Err(e),
            }

            self.heartbeat().await;
        }
    }

    /// One sync exchange: short-circuit on an unchanged hash, otherwise
    /// apply the plan and run its directives.
    async fn sync_once(&mut self) -> AgentResult<Option<LoopExit>> {
        let node_id = self
            .identity
            .node_id
            .clone()
            .ok_or_else(|| AgentError::Internal("sync without node id".to_owned()))?;
        let last_hash = self.applied.as_ref().map(|a| a.hash.clone());

        match self.client.sync(&node_id, last_hash.as_deref(), device_info()).await? {
            SyncOutcome::NotModified => Ok(None),
            SyncOutcome::Pending => {
                tracing::info!("hub reports pending approval");
                Ok(None)
            }
            SyncOutcome::Revoked => {
                tracing::warn!("node revoked, tearing down and idling");
                self.teardown().await;
                self.isolated = true;
                Ok(None)
            }
            SyncOutcome::Plan(resp) => self.apply(*resp).await,
        }
    }

    /// Apply a new plan. Directives win over plan content.
    async fn apply(&mut self, resp: SyncResponse) -> AgentResult<Option<LoopExit>> {
        for directive in &resp.directives {
            match directive {
                Directive::Isolate => {
                    tracing::warn!("isolate directive, tearing down tunnel and chain");
                    self.teardown().await;
                    self.isolated = true;
                    return Ok(None);
                }
                Directive::Shutdown => {
                    tracing::warn!("shutdown directive");
                    return Ok(Some(LoopExit::Shutdown));
                }
                Directive::Reenroll => {
                    tracing::warn!("reenroll directive, discarding local identity");
                    return Ok(Some(LoopExit::Rotate));
                }
                Directive::RotateKeyBy { deadline_ms } => {
                    tracing::warn!(
                        deadline_ms = *deadline_ms,
                        "key rotation requested, re-enrolling with a fresh key"
                    );
                    return Ok(Some(LoopExit::Rotate));
                }
            }
        }

        if self.config.dry_run {
            tracing::info!(
                hash = %resp.plan_hash,
                peers = resp.plan.peers.len(),
                rules = resp.plan.firewall_rules.len(),
                "dry run, plan not applied"
            );
            self.remember(resp.plan_hash, resp.plan)?;
            return Ok(None);
        }

        // Interface parameters only force a reconfigure when they differ
        // from the last applied plan; peers reconcile in place either way.
        let interface_changed = self
            .applied
            .as_ref()
            .map(|a| a.plan.interface != resp.plan.interface)
            .unwrap_or(true);
        if interface_changed || self.isolated || !self.wg.exists().await {
            let key_file = self.identity.private_key_file(&self.config.state_dir)?;
            self.wg.ensure(&resp.plan.interface, &key_file).await?;
        }

        let (added, updated, removed) = self.wg.reconcile_peers(&resp.plan.peers).await?;

        let ordered = firewall::installation_order(&resp.plan.firewall_rules);
        self.fw.apply(&ordered).await?;
        self.fw.verify_default_deny().await?;

        self.isolated = false;
        tracing::info!(
            hash = %resp.plan_hash,
            added,
            updated,
            removed,
            rules = resp.plan.firewall_rules.len(),
            "plan applied"
        );
        self.remember(resp.plan_hash, resp.plan)?;
        Ok(None)
    }

    fn remember(&mut self, hash: String, plan: Plan) -> AgentResult<()> {
        let applied = AppliedPlan { hash, plan };
        persist_applied(&self.config.state_dir, &applied)?;
        self.applied = Some(applied);
        Ok(())
    }

    async fn heartbeat(&mut self) {
        let Some(node_id) = self.identity.node_id.clone() else { return };
        let enforcing = !self.config.dry_run && !self.isolated;
        let metrics = metrics::collect(
            &self.wg,
            &self.fw,
            self.started.elapsed().as_secs(),
            &self.config.state_dir,
            &mut self.last_dropped,
            enforcing,
        )
        .await;

        match self.client.heartbeat(&node_id, metrics).await {
            Ok(resp) => {
                tracing::debug!(next_interval = resp.next_interval_secs, "heartbeat acked");
            }
            Err(e) => {
                tracing::debug!(err = %e, "heartbeat failed");
            }
        }
    }

    /// Tear down the tunnel and the chain. Errors are logged, not fatal —
    /// teardown must make progress even on a half-configured host.
    async fn teardown(&mut self) {
        if self.config.dry_run {
            return;
        }
        if let Err(e) = self.wg.teardown().await {
            tracing::warn!(err = %e, "interface teardown failed");
        }
        if let Err(e) = self.fw.teardown().await {
            tracing::warn!(err = %e, "chain teardown failed");
        }
    }
}

/// Follow the hub event stream and nudge the loop on plan-affecting
/// events. Reconnects with capped backoff; the periodic tick covers any
/// stream downtime.
fn spawn_stream_listener(
    config: &AgentConfig,
    token: Option<String>,
    nudge_tx: tokio::sync::mpsc::Sender<()>,
    shutdown: CancellationToken,
) {
    let hub_url = config.hub_url.clone();
    tokio::spawn(async move {
        use futures_util::StreamExt;

        let Ok(client) = HubClient::new(&hub_url, token) else { return };
        let mut cursor = 0u64;
        let mut backoff = std::time::Duration::from_secs(1);

        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match client.events(cursor).await {
                Ok(resp) => {
                    backoff = std::time::Duration::from_secs(1);
                    let mut stream = resp.bytes_stream();
                    let mut buf = Vec::new();
                    loop {
                        let chunk = tokio::select! {
                            _ = shutdown.cancelled() => return,
                            chunk = stream.next() => chunk,
                        };
                        let Some(Ok(bytes)) = chunk else { break };
                        buf.extend_from_slice(&bytes);
                        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buf.drain(..=pos).collect();
                            let Ok(frame) =
                                serde_json::from_slice::<ztproto::api::StreamFrame>(&line)
                            else {
                                continue;
                            };
                            if frame.id == 0 {
                                continue; // keepalive
                            }
                            cursor = frame.id;
                            let _ = nudge_tx.try_send(());
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(err = %e, "event stream unavailable, retrying in {backoff:?}");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.cancelled() => return,
            }
            backoff = next_backoff(backoff);
        }
    });
}

fn os_info() -> String {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|contents| {
            contents
                .lines()
                .find(|l| l.starts_with("PRETTY_NAME="))
                .map(|l| l.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_owned())
        })
        .unwrap_or_else(|| std::env::consts::OS.to_owned())
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        os_version: os_info(),
        kernel: std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|s| s.trim().to_owned())
            .unwrap_or_default(),
        patch_age_days: 0,
        suspicious_process: false,
        agent_version: env!("CARGO_PKG_VERSION").to_owned(),
    }
}

#[cfg(test)]
#[path = "enforce_tests.rs"]
mod tests;
