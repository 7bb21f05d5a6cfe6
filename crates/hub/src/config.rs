// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Configuration for the zt hub control plane.
#[derive(Debug, Clone, clap::Args)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "ZT_HUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9600, env = "HUB_API_PORT")]
    pub port: u16,

    /// Admin API shared secret (`X-Admin-Token`). If unset, admin auth is disabled.
    #[arg(long, env = "ADMIN_SECRET")]
    pub admin_secret: Option<String>,

    /// Master secret for encrypting client-device private keys at rest.
    #[arg(long, env = "SECRET_KEY")]
    pub secret_key: Option<String>,

    /// Overlay network CIDR.
    #[arg(long, default_value = "10.10.0.0/24", env = "OVERLAY_NETWORK")]
    pub overlay_network: String,

    /// WireGuard listen port advertised to peers.
    #[arg(long, default_value_t = 51820, env = "WG_PORT")]
    pub wg_port: u16,

    /// Publicly reachable hub endpoint (`host:port`). Defaults to the hub
    /// node's registered real IP plus the WireGuard port.
    #[arg(long, env = "HUB_ENDPOINT")]
    pub hub_endpoint: Option<String>,

    /// First address of the node allocation pool.
    #[arg(long, default_value = "10.10.0.2", env = "ZT_NODE_POOL_START")]
    pub node_pool_start: Ipv4Addr,

    /// Last address of the node allocation pool.
    #[arg(long, default_value = "10.10.0.99", env = "ZT_NODE_POOL_END")]
    pub node_pool_end: Ipv4Addr,

    /// First address of the client-device allocation pool.
    #[arg(long, default_value = "10.10.0.100", env = "CLIENT_IP_POOL_START")]
    pub client_pool_start: Ipv4Addr,

    /// Last address of the client-device allocation pool.
    #[arg(long, default_value = "10.10.0.250", env = "CLIENT_IP_POOL_END")]
    pub client_pool_end: Ipv4Addr,

    /// Default client-device profile lifetime in days.
    #[arg(long, default_value_t = 7, env = "CLIENT_DEFAULT_EXPIRES_DAYS")]
    pub client_default_expires_days: u32,

    /// Maximum simultaneously active devices per user.
    #[arg(long, default_value_t = 5, env = "CLIENT_MAX_DEVICES_PER_USER")]
    pub client_max_devices_per_user: u32,

    /// DNS server pushed to client-device profiles.
    #[arg(long, env = "ZT_CLIENT_DNS")]
    pub client_dns: Option<String>,

    /// Directory for the event log. If unset, state is in-memory only.
    #[arg(long, env = "ZT_HUB_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Approve nodes automatically on registration.
    #[arg(long, default_value_t = false, env = "ZT_AUTO_APPROVE")]
    pub auto_approve: bool,

    /// Heartbeat interval handed to agents, in seconds.
    #[arg(long, default_value_t = 60, env = "ZT_HEARTBEAT_INTERVAL_SECS")]
    pub heartbeat_interval_secs: u64,

    /// Released overlay addresses are not reused for this many hours.
    #[arg(long, default_value_t = 24, env = "ZT_IP_COOLDOWN_HOURS")]
    pub ip_cooldown_hours: u64,

    /// Event-stream keepalive ping interval in seconds.
    #[arg(long, default_value_t = 25, env = "ZT_STREAM_KEEPALIVE_SECS")]
    pub stream_keepalive_secs: u64,
}

impl HubConfig {
    /// Overlay network base address and prefix length.
    pub fn overlay_cidr(&self) -> (Ipv4Addr, u8) {
        parse_cidr(&self.overlay_network).unwrap_or((Ipv4Addr::new(10, 10, 0, 0), 24))
    }

    /// The hub's reserved overlay address (`.1` of the overlay network).
    pub fn hub_overlay_ip(&self) -> Ipv4Addr {
        let (base, _) = self.overlay_cidr();
        let octets = base.octets();
        Ipv4Addr::new(octets[0], octets[1], octets[2], 1)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn ip_cooldown_ms(&self) -> u64 {
        self.ip_cooldown_hours * 3600 * 1000
    }

    pub fn stream_keepalive(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stream_keepalive_secs)
    }
}

/// Parse `a.b.c.d/len` into base address and prefix length.
pub fn parse_cidr(s: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, len) = s.split_once('/')?;
    let addr: Ipv4Addr = addr.trim().parse().ok()?;
    let len: u8 = len.trim().parse().ok()?;
    if len > 32 {
        return None;
    }
    Some((addr, len))
}

/// Whether `ip` lies within the `cidr` network.
pub fn cidr_contains(cidr: (Ipv4Addr, u8), ip: Ipv4Addr) -> bool {
    let (base, len) = cidr;
    if len == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - u32::from(len));
    (u32::from(base) & mask) == (u32::from(ip) & mask)
}
