// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the hub control plane.

pub mod access;
pub mod admin;
pub mod agent;
pub mod auth;
pub mod devices;
pub mod stream;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::HubState;

/// Build the axum `Router` with all hub routes.
pub fn build_router(state: Arc<HubState>) -> Router {
    Router::new()
        // Liveness (no auth)
        .route("/health", get(admin::health))
        // Agent protocol
        .route("/api/v1/agent/register", post(agent::register))
        .route("/api/v1/agent/sync", post(agent::sync))
        .route("/api/v1/agent/heartbeat", post(agent::heartbeat))
        // Access evaluation + event stream (admin or node)
        .route("/api/v1/access/evaluate", post(access::evaluate))
        .route("/api/v1/events", get(stream::events))
        // Node lifecycle
        .route("/api/v1/admin/nodes", get(admin::list_nodes))
        .route("/api/v1/admin/nodes/{id}", get(admin::get_node))
        .route("/api/v1/admin/nodes/{id}/approve", post(admin::approve_node))
        .route("/api/v1/admin/nodes/{id}/suspend", post(admin::suspend_node))
        .route("/api/v1/admin/nodes/{id}/resume", post(admin::resume_node))
        .route("/api/v1/admin/nodes/{id}/revoke", post(admin::revoke_node))
        .route("/api/v1/admin/trust/{id}", get(admin::trust_history))
        // Identity
        .route("/api/v1/access/users", post(admin::create_user).get(admin::list_users))
        .route(
            "/api/v1/access/users/{id}",
            get(admin::get_user).put(admin::update_user).delete(admin::delete_user),
        )
        .route("/api/v1/access/groups", post(admin::create_group).get(admin::list_groups))
        .route(
            "/api/v1/access/groups/{id}",
            get(admin::get_group).put(admin::update_group).delete(admin::delete_group),
        )
        .route("/api/v1/access/groups/{id}/members", post(admin::add_group_member))
        .route(
            "/api/v1/access/groups/{id}/members/{user_id}",
            delete(admin::remove_group_member),
        )
        // Policies
        .route("/api/v1/access/policies", post(admin::create_policy).get(admin::list_policies))
        .route(
            "/api/v1/access/policies/{id}",
            get(admin::get_policy).put(admin::update_policy).delete(admin::delete_policy),
        )
        .route(
            "/api/v1/admin/network-policies",
            post(admin::create_network_policy).get(admin::list_network_policies),
        )
        .route(
            "/api/v1/admin/network-policies/{id}",
            put(admin::update_network_policy).delete(admin::delete_network_policy),
        )
        // Client devices
        .route("/api/v1/client/devices", post(devices::create_device).get(devices::list_devices))
        .route("/api/v1/client/devices/{id}", delete(devices::revoke_device))
        // One-shot config delivery (token in path)
        .route("/api/v1/client/config/{token}", get(devices::device_config))
        .route("/api/v1/client/config/{token}/raw", get(devices::device_config_raw))
        .route("/api/v1/client/config/{token}/qr", get(devices::device_config_qr))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
