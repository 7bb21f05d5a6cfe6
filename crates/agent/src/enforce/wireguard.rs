// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WireGuard interface lifecycle and in-place peer reconciliation.
//!
//! Peers are added, updated, and removed individually with `wg set`; the
//! interface itself is only torn down when its own parameters change.

use std::collections::HashMap;
use std::path::Path;

use ztproto::plan::{InterfaceConfig, PeerConfig};

use crate::enforce::run_cmd;
use crate::error::{AgentError, AgentResult};

/// A peer as currently installed in the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPeer {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub keepalive: Option<u16>,
    /// Epoch seconds of the latest handshake, 0 if never.
    pub latest_handshake: u64,
}

pub struct WgInterface {
    pub name: String,
}

impl WgInterface {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }

    /// Whether the interface currently exists.
    pub async fn exists(&self) -> bool {
        run_cmd("ip", &["link", "show", &self.name]).await.is_ok()
    }

    /// Create and configure the interface if needed, then apply address,
    /// key, and listen port.
    pub async fn ensure(
        &self,
        interface: &InterfaceConfig,
        private_key_file: &Path,
    ) -> AgentResult<()> {
        if !self.exists().await {
            run_cmd("ip", &["link", "add", &self.name, "type", "wireguard"]).await?;
        }

        let key_path = private_key_file
            .to_str()
            .ok_or_else(|| AgentError::Config("private key path is not utf-8".to_owned()))?;
        let mut args: Vec<String> =
            vec!["set".into(), self.name.clone(), "private-key".into(), key_path.into()];
        if let Some(port) = interface.listen_port {
            args.push("listen-port".into());
            args.push(port.to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_cmd("wg", &arg_refs).await?;

        if !interface.address.is_empty() {
            run_cmd("ip", &["address", "replace", &interface.address, "dev", &self.name]).await?;
        }
        run_cmd("ip", &["link", "set", &self.name, "up"]).await?;
        Ok(())
    }

    /// Remove the interface. Idempotent.
    pub async fn teardown(&self) -> AgentResult<()> {
        if self.exists().await {
            run_cmd("ip", &["link", "del", &self.name]).await?;
        }
        Ok(())
    }

    /// Read the kernel peer table from `wg show <iface> dump`.
    pub async fn kernel_peers(&self) -> AgentResult<HashMap<String, KernelPeer>> {
        let out = run_cmd("wg", &["show", &self.name, "dump"]).await?;
        Ok(parse_dump(&out))
    }

    /// Reconcile the kernel peer table against the desired list in place.
    ///
    /// Returns `(added, updated, removed)` counts.
    pub async fn reconcile_peers(&self, desired: &[PeerConfig]) -> AgentResult<(u32, u32, u32)> {
        let kernel = self.kernel_peers().await?;
        let mut added = 0;
        let mut updated = 0;
        let mut removed = 0;

        for peer in desired {
            let needs_set = match kernel.get(&peer.public_key) {
                None => {
                    added += 1;
                    true
                }
                Some(existing) => {
                    let changed = existing.allowed_ips != peer.allowed_ips
                        || existing.keepalive != peer.keepalive
                        || (peer.endpoint.is_some() && existing.endpoint != peer.endpoint);
                    if changed {
                        updated += 1;
                    }
                    changed
                }
            };
            if needs_set {
                self.set_peer(peer).await?;
            }
        }

        let wanted: std::collections::HashSet<&str> =
            desired.iter().map(|p| p.public_key.as_str()).collect();
        for key in kernel.keys() {
            if !wanted.contains(key.as_str()) {
                run_cmd("wg", &["set", &self.name, "peer", key, "remove"]).await?;
                removed += 1;
            }
        }

        Ok((added, updated, removed))
    }

    async fn set_peer(&self, peer: &PeerConfig) -> AgentResult<()> {
        let allowed = peer.allowed_ips.join(",");
        let mut args: Vec<String> = vec![
            "set".into(),
            self.name.clone(),
            "peer".into(),
            peer.public_key.clone(),
            "allowed-ips".into(),
            allowed,
        ];
        if let Some(ref endpoint) = peer.endpoint {
            args.push("endpoint".into());
            args.push(endpoint.clone());
        }
        if let Some(keepalive) = peer.keepalive {
            args.push("persistent-keepalive".into());
            args.push(keepalive.to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_cmd("wg", &arg_refs).await?;
        Ok(())
    }

    /// Age in seconds of the most recent handshake across all peers.
    pub async fn latest_handshake_age(&self) -> Option<u64> {
        let peers = self.kernel_peers().await.ok()?;
        let latest = peers.values().map(|p| p.latest_handshake).max().filter(|t| *t > 0)?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Some(now.saturating_sub(latest))
    }
}

/// Parse `wg show <iface> dump` output. The first line describes the
/// interface; peer lines are tab-separated:
/// `pubkey psk endpoint allowed-ips handshake rx tx keepalive`.
pub fn parse_dump(out: &str) -> HashMap<String, KernelPeer> {
    let mut peers = HashMap::new();
    for line in out.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            continue;
        }
        let endpoint = match fields[2] {
            "(none)" => None,
            ep => Some(ep.to_owned()),
        };
        let allowed_ips = match fields[3] {
            "(none)" => vec![],
            list => list.split(',').map(str::to_owned).collect(),
        };
        let keepalive = match fields[7] {
            "off" => None,
            v => v.parse().ok(),
        };
        peers.insert(
            fields[0].to_owned(),
            KernelPeer {
                public_key: fields[0].to_owned(),
                endpoint,
                allowed_ips,
                keepalive,
                latest_handshake: fields[4].parse().unwrap_or(0),
            },
        );
    }
    peers
}

#[cfg(test)]
#[path = "wireguard_tests.rs"]
mod tests;
