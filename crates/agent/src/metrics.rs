// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat metrics collection.
//!
//! Tunnel and firewall numbers come from the kernel; host security signals
//! (SSH failures, patch age, suspicious-process flags) are read from a
//! drop-in report file that host tooling maintains.

use std::path::Path;

use serde::Deserialize;

use ztproto::api::HeartbeatMetrics;

use crate::enforce::firewall::FirewallChain;
use crate::enforce::wireguard::WgInterface;

const HOST_REPORT_FILE: &str = "host_report.json";

/// Optional host-tooling report merged into each heartbeat.
#[derive(Debug, Default, Deserialize)]
pub struct HostReport {
    #[serde(default)]
    pub ssh_failures: u32,
    #[serde(default)]
    pub traffic_anomaly: bool,
    #[serde(default)]
    pub patch_age_days: u32,
    #[serde(default)]
    pub suspicious_process: bool,
}

pub fn read_host_report(state_dir: &Path) -> HostReport {
    let path = state_dir.join(HOST_REPORT_FILE);
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default()
}

/// Collect one heartbeat's metrics.
///
/// `last_dropped` carries the previous firewall drop counter so violations
/// are reported per-window rather than cumulatively.
pub async fn collect(
    wg: &WgInterface,
    fw: &FirewallChain,
    uptime_secs: u64,
    state_dir: &Path,
    last_dropped: &mut u64,
    enforcing: bool,
) -> HeartbeatMetrics {
    let report = read_host_report(state_dir);

    let (handshake_age_secs, firewall_violations) = if enforcing {
        let age = wg.latest_handshake_age().await;
        let dropped = fw.dropped_packets().await.unwrap_or(*last_dropped);
        let delta = dropped.saturating_sub(*last_dropped);
        *last_dropped = dropped;
        (age, delta.min(u64::from(u32::MAX)) as u32)
    } else {
        (None, 0)
    };

    HeartbeatMetrics {
        uptime_secs,
        handshake_age_secs,
        ssh_failures: report.ssh_failures,
        firewall_violations,
        traffic_anomaly: report.traffic_anomaly,
        patch_age_days: report.patch_age_days,
        suspicious_process: report.suspicious_process,
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
