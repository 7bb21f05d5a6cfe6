// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! zt hub: Zero Trust overlay-network control plane.
//!
//! Holds identity, membership, access policy, and peer topology in an
//! event-sourced store; compiles per-node WireGuard plans and firewall
//! rules; serves the agent protocol and the admin API.

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod ipam;
pub mod model;
pub mod plan;
pub mod policy;
pub mod state;
pub mod store;
pub mod token;
pub mod transport;
pub mod trust;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::state::HubState;
use crate::transport::build_router;

/// Run the hub until shutdown.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    if config.admin_secret.is_none() {
        tracing::warn!("ADMIN_SECRET is unset, admin API auth is disabled");
    }

    let state = HubState::open(config, shutdown.clone())?;

    tracing::info!("zt hub listening on {addr}");
    let router = build_router(std::sync::Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    // A refused write shut the server down; surface it as a distinct exit.
    if state.invariant_failed.load(std::sync::atomic::Ordering::SeqCst) {
        return Err(anyhow::Error::new(crate::error::HubError::InvariantViolated));
    }
    Ok(())
}
