// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node trust scoring.
//!
//! `score = 0.30·role_weight + 0.25·device_health + 0.25·behavior
//!        + 0.20·security_events`, every sub-score normalized to [0,100].
//! The score maps to a risk level, which maps to an enforcement action.
//! Consecutive identical scores suppress event emission to bound log volume.

use serde::{Deserialize, Serialize};

use ztproto::api::{HeartbeatMetrics, NodeRole};

/// Risk buckets derived from the trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What the control plane does about a risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustAction {
    Allow,
    /// Plan narrowed to the minimum rule set.
    Restrict,
    /// Status forced to suspended; removed from peer lists on next compile.
    Isolate,
}

/// The normalized sub-scores that produced a trust score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustInputs {
    pub role_weight: u8,
    pub device_health: u8,
    pub behavior: u8,
    pub security_events: u8,
}

/// Static per-role baseline. Operations infrastructure is trusted most,
/// end-user clients least.
pub fn role_weight(role: NodeRole) -> u8 {
    match role {
        NodeRole::Ops => 100,
        NodeRole::Hub => 92,
        NodeRole::Db => 85,
        NodeRole::App => 75,
        NodeRole::Gateway => 70,
        NodeRole::Monitor => 65,
        NodeRole::Client => 50,
    }
}

fn clamp_score(v: i64) -> u8 {
    v.clamp(0, 100) as u8
}

/// Device posture: OS/patch freshness and suspicious-process flag.
fn device_health(metrics: &HeartbeatMetrics) -> u8 {
    let mut score: i64 = 100;
    // 2 points per day unpatched, capped at 60.
    score -= i64::from(metrics.patch_age_days.min(30)) * 2;
    if metrics.suspicious_process {
        score -= 40;
    }
    clamp_score(score)
}

/// Heartbeat regularity, traffic anomalies, handshake staleness.
fn behavior(metrics: &HeartbeatMetrics, heartbeat_gap_secs: Option<u64>, interval_secs: u64) -> u8 {
    let mut score: i64 = 100;
    if metrics.traffic_anomaly {
        score -= 40;
    }
    if let Some(age) = metrics.handshake_age_secs {
        if age > 180 {
            score -= 30;
        }
    }
    if let Some(gap) = heartbeat_gap_secs {
        if gap > interval_secs.saturating_mul(2) {
            score -= 20;
        }
    }
    clamp_score(score)
}

/// SSH failures and firewall violations in the reporting window.
fn security_events(metrics: &HeartbeatMetrics) -> u8 {
    let mut score: i64 = 100;
    score -= i64::from(metrics.ssh_failures) * 2;
    score -= i64::from(metrics.firewall_violations) * 5;
    clamp_score(score)
}

/// Security sub-scores at or below this ratchet the overall score down.
const SECURITY_SATURATION: u8 = 20;
/// Per-heartbeat ratchet step under saturated abuse.
const SATURATION_STEP: u8 = 15;

/// Compute the weighted trust score and its inputs.
///
/// `heartbeat_gap_secs` is the observed gap since the previous heartbeat,
/// `None` on the first one. `previous` is the node's current score:
/// sustained saturated abuse ratchets the score down from it each
/// heartbeat, so an attack that persists for an hour reaches critical even
/// when the other sub-scores hold the weighted sum up. The ratchet
/// releases as soon as the security sub-score recovers.
pub fn evaluate(
    role: NodeRole,
    metrics: &HeartbeatMetrics,
    heartbeat_gap_secs: Option<u64>,
    interval_secs: u64,
    previous: u8,
) -> (u8, TrustInputs) {
    let inputs = TrustInputs {
        role_weight: role_weight(role),
        device_health: device_health(metrics),
        behavior: behavior(metrics, heartbeat_gap_secs, interval_secs),
        security_events: security_events(metrics),
    };

    let weighted = 0.30 * f64::from(inputs.role_weight)
        + 0.25 * f64::from(inputs.device_health)
        + 0.25 * f64::from(inputs.behavior)
        + 0.20 * f64::from(inputs.security_events);
    let mut score = clamp_score(weighted.round() as i64);

    if inputs.security_events <= SECURITY_SATURATION {
        score = score.min(previous.saturating_sub(SATURATION_STEP));
    }

    (score, inputs)
}

pub fn risk_level(score: u8) -> RiskLevel {
    match score {
        80..=100 => RiskLevel::Low,
        60..=79 => RiskLevel::Medium,
        40..=59 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

pub fn action_for(risk: RiskLevel) -> TrustAction {
    match risk {
        RiskLevel::Low | RiskLevel::Medium => TrustAction::Allow,
        RiskLevel::High => TrustAction::Restrict,
        RiskLevel::Critical => TrustAction::Isolate,
    }
}

#[cfg(test)]
#[path = "trust_tests.rs"]
mod tests;
