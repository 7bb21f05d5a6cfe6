// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay address allocation from disjoint node and client pools.
//!
//! Allocation is lowest-free: scan the pool ascending, skip anything
//! currently allocated or released inside the cool-down window, take the
//! first remaining address. The hub's `.1` is reserved and never part of
//! a pool.

use std::net::Ipv4Addr;

use crate::config::HubConfig;
use crate::error::{err, HubError, HubResult};
use crate::store::projection::Projection;

/// Which pool to allocate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Node,
    Client,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Client => "client",
        }
    }

    fn bounds(&self, config: &HubConfig) -> (Ipv4Addr, Ipv4Addr) {
        match self {
            Self::Node => (config.node_pool_start, config.node_pool_end),
            Self::Client => (config.client_pool_start, config.client_pool_end),
        }
    }
}

/// Lowest free address in the pool, honoring the release cool-down.
pub fn allocate(
    config: &HubConfig,
    projection: &Projection,
    pool: Pool,
    now_ms: u64,
) -> HubResult<Ipv4Addr> {
    let (start, end) = pool.bounds(config);
    let cooldown_ms = config.ip_cooldown_ms();

    let lo = u32::from(start);
    let hi = u32::from(end);
    if lo > hi {
        return err(HubError::Internal, format!("{} pool bounds are inverted", pool.as_str()));
    }

    for raw in lo..=hi {
        let ip = Ipv4Addr::from(raw);
        if projection.ip_allocated(ip) {
            continue;
        }
        if let Some(released_at) = projection.ip_released_at(ip) {
            if now_ms.saturating_sub(released_at) < cooldown_ms {
                continue;
            }
        }
        return Ok(ip);
    }

    err(HubError::PoolExhausted, format!("{} pool exhausted", pool.as_str()))
}

/// Whether an `IpamExhausted` event may be emitted for this pool now.
/// Emission is limited to once per hour.
pub fn may_emit_exhausted(projection: &Projection, pool: Pool, now_ms: u64) -> bool {
    const HOUR_MS: u64 = 3600 * 1000;
    match projection.last_exhausted_at(pool.as_str()) {
        Some(last) => now_ms.saturating_sub(last) >= HOUR_MS,
        None => true,
    }
}

#[cfg(test)]
#[path = "ipam_tests.rs"]
mod tests;
