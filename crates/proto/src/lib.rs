// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared wire types for the zt control plane and node agent.
//!
//! This crate is the canonical source for everything that crosses the
//! hub/agent boundary: register/sync/heartbeat bodies, compiled plans,
//! directives, and event-stream frames. Both binaries agree on these
//! shapes so a hub upgrade never strands a fleet mid-sync.

pub mod api;
pub mod plan;
