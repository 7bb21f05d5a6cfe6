// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! zt agent: node-side enforcement for the Zero Trust overlay.
//!
//! Registers with the hub, keeps the WireGuard interface and the dedicated
//! firewall chain converged on the hub's compiled plan, and reports
//! liveness and trust metrics.

pub mod config;
pub mod enforce;
pub mod error;
pub mod hub_client;
pub mod identity;
pub mod metrics;

use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::enforce::{firewall::FirewallChain, EnforcementLoop};
use crate::error::AgentResult;
use crate::hub_client::HubClient;
use crate::identity::NodeIdentity;

/// Run the agent until shutdown.
pub async fn run(config: AgentConfig) -> AgentResult<()> {
    let shutdown = CancellationToken::new();

    // The host must provide the netfilter chain facility; without it the
    // default-deny posture cannot be enforced.
    if !config.dry_run {
        FirewallChain::probe().await?;
    }

    let identity = NodeIdentity::load_or_generate(&config.state_dir)?;
    let client = HubClient::new(&config.hub_url, identity.node_token.clone())?;

    // Signal-driven shutdown.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let looper = EnforcementLoop::new(config, identity, client, shutdown);
    looper.run().await
}
