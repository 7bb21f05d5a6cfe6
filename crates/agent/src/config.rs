// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Configuration for the zt node agent.
#[derive(Debug, Clone, clap::Args)]
pub struct AgentConfig {
    /// Base URL of the hub control plane.
    #[arg(long, env = "HUB_URL")]
    pub hub_url: String,

    /// Hostname to register as. Defaults to the kernel hostname.
    #[arg(long, env = "ZT_AGENT_HOSTNAME")]
    pub hostname: Option<String>,

    /// Overlay role of this node.
    #[arg(long, default_value = "app", env = "ZT_AGENT_ROLE")]
    pub role: String,

    /// Public IP to advertise for inbound tunnels (hub/gateway roles).
    #[arg(long, env = "ZT_AGENT_REAL_IP")]
    pub real_ip: Option<String>,

    /// WireGuard interface name.
    #[arg(long, default_value = "wg0", env = "ZT_WG_IFACE")]
    pub interface: String,

    /// Directory for identity and applied-plan state.
    #[arg(long, default_value = "/var/lib/ztagent", env = "ZT_AGENT_STATE_DIR")]
    pub state_dir: PathBuf,

    /// Sync tick interval in seconds (the hub may push sooner).
    #[arg(long, default_value_t = 60, env = "ZT_SYNC_INTERVAL_SECS")]
    pub sync_interval_secs: u64,

    /// Skip kernel enforcement (sync and log plans only). For development.
    #[arg(long, default_value_t = false, env = "ZT_AGENT_DRY_RUN")]
    pub dry_run: bool,
}

impl AgentConfig {
    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs)
    }

    /// Resolved hostname: the flag, else the kernel hostname.
    pub fn resolved_hostname(&self) -> Option<String> {
        if let Some(ref h) = self.hostname {
            return Some(h.clone());
        }
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }
}
