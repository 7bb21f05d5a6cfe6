// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent protocol handlers: register, sync, heartbeat.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use uuid::Uuid;

use ztproto::api::{
    Directive, HeartbeatRequest, HeartbeatResponse, NodeRole, NodeStatus, RegisterRequest,
    RegisterResponse, SyncRequest, SyncResponse,
};
use ztproto::plan::Plan;

use crate::error::{err, HubError, HubResult};
use crate::ipam::{self, Pool};
use crate::model::{epoch_ms, normalize_hostname, valid_wg_key, Node, TrustSnapshot};
use crate::plan::{default_deny_rule, plan_for_node};
use crate::state::{Core, HubState};
use crate::store::event::{aggregate, DomainEvent, ProposedEvent};
use crate::token;
use crate::transport::auth::AuthContext;
use crate::trust;

/// `POST /api/v1/agent/register` — idempotent node registration.
pub async fn register(
    State(s): State<Arc<HubState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let result = s.transact(|core| register_in(core, &s, &req)).await;
    match result {
        Ok((_, resp)) => {
            tracing::info!(
                hostname = %req.hostname,
                role = %req.role,
                status = %resp.status,
                "node register"
            );
            Json(resp).into_response()
        }
        Err((code, msg)) => {
            tracing::warn!(hostname = %req.hostname, code = %code, "register rejected: {msg}");
            let mut response = code.to_http_response(msg).into_response();
            if code == HubError::PoolExhausted {
                // Admin action is required; tell agents when to come back.
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, axum::http::HeaderValue::from_static("300"));
            }
            response
        }
    }
}

fn register_in(
    core: &mut Core,
    s: &HubState,
    req: &RegisterRequest,
) -> HubResult<(Vec<ProposedEvent>, RegisterResponse)> {
    let now_ms = epoch_ms();

    let Some(hostname) = normalize_hostname(&req.hostname) else {
        return err(HubError::InvalidArgument, format!("malformed hostname {:?}", req.hostname));
    };
    if !valid_wg_key(&req.public_key) {
        return err(HubError::InvalidArgument, "public key must be 32 bytes base64");
    }
    if core.projection.key_blacklisted(&req.public_key) {
        return err(HubError::NotApproved, "public key belongs to a revoked node");
    }

    // Idempotent on (hostname, public_key); a different key for a live
    // hostname is a conflict.
    if let Some(existing) = core.projection.node_by_hostname(&hostname) {
        if existing.public_key == req.public_key {
            let resp = register_response(core, s, existing.id.clone(), now_ms);
            return Ok((vec![], resp));
        }
        return err(HubError::Conflict, format!("hostname {hostname} is registered"));
    }
    if core
        .projection
        .nodes()
        .any(|n| n.status != NodeStatus::Revoked && n.public_key == req.public_key)
    {
        return err(HubError::Conflict, "public key is registered under another hostname");
    }

    // Allocate the overlay address. The hub takes its reserved `.1`.
    let (overlay_ip, pool_name) = if req.role == NodeRole::Hub {
        let ip = s.config.hub_overlay_ip();
        if core.projection.ip_allocated(ip) {
            return err(HubError::Conflict, "hub address is already allocated");
        }
        (ip, "hub")
    } else {
        match ipam::allocate(&s.config, &core.projection, Pool::Node, now_ms) {
            Ok(ip) => (ip, Pool::Node.as_str()),
            Err(e @ (HubError::PoolExhausted, _)) => {
                let mut events = vec![];
                if ipam::may_emit_exhausted(&core.projection, Pool::Node, now_ms) {
                    events.push(ProposedEvent::new(
                        aggregate::IPAM,
                        Pool::Node.as_str(),
                        DomainEvent::IpamExhausted { pool: Pool::Node.as_str().to_owned() },
                    ));
                }
                // Commit the rate-limited exhaustion marker, then surface.
                for proposed in events {
                    let record = core.store.append(proposed)?;
                    core.projection.apply(&record);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    };

    let node_id = Uuid::new_v4().to_string();
    let node = Node {
        id: node_id.clone(),
        hostname,
        role: req.role,
        public_key: req.public_key.clone(),
        real_ip: req.real_ip.clone(),
        overlay_ip: Some(overlay_ip),
        status: NodeStatus::Pending,
        trust_score: trust::role_weight(req.role),
        agent_version: req.agent_version.clone(),
        os_info: req.os_info.clone(),
        created_at_ms: now_ms,
        approved_by: None,
    };

    let mut events = vec![
        ProposedEvent::new(
            aggregate::IPAM,
            overlay_ip.to_string(),
            DomainEvent::IpAllocated {
                address: overlay_ip,
                pool: pool_name.to_owned(),
                owner_id: node_id.clone(),
            },
        )
        .actor("agent"),
        ProposedEvent::new(aggregate::NODE, node_id.clone(), DomainEvent::NodeRegistered { node })
            .actor("agent")
            .request_id(req.request_id.clone()),
    ];

    if s.config.auto_approve {
        events.push(
            ProposedEvent::new(
                aggregate::NODE,
                node_id.clone(),
                DomainEvent::NodeApproved {
                    node_id: node_id.clone(),
                    approved_by: "auto".to_owned(),
                    node_token: token::mint(),
                },
            )
            .actor("system"),
        );
    }

    // The response reflects post-commit state; compute the pieces that do
    // not depend on the commit now and fill status/token from the events.
    let status = if s.config.auto_approve { NodeStatus::Active } else { NodeStatus::Pending };
    let node_token = events.iter().find_map(|e| match &e.event {
        DomainEvent::NodeApproved { node_token, .. } => Some(node_token.clone()),
        _ => None,
    });

    let resp = RegisterResponse {
        node_id,
        status,
        overlay_ip: overlay_ip.to_string(),
        hub_public_key: hub_public_key(core, req),
        hub_endpoint: crate::plan::hub_endpoint(&s.config, &core.projection).unwrap_or_default(),
        server_time_ms: now_ms,
        node_token,
    };
    Ok((events, resp))
}

/// The hub public key a registering node should peer with. A node that is
/// itself the hub sees its own key.
fn hub_public_key(core: &Core, req: &RegisterRequest) -> String {
    if req.role == NodeRole::Hub {
        return req.public_key.clone();
    }
    core.projection
        .nodes()
        .find(|n| n.role == NodeRole::Hub && n.status != NodeStatus::Revoked)
        .map(|n| n.public_key.clone())
        .unwrap_or_default()
}

fn register_response(core: &Core, s: &HubState, node_id: String, now_ms: u64) -> RegisterResponse {
    let node = core.projection.node(&node_id);
    let (status, overlay_ip, public_key, role) = match node {
        Some(n) => (
            n.status,
            n.overlay_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            n.public_key.clone(),
            n.role,
        ),
        None => (NodeStatus::Pending, String::new(), String::new(), NodeRole::App),
    };
    let hub_key = if role == NodeRole::Hub {
        public_key
    } else {
        core.projection
            .nodes()
            .find(|n| n.role == NodeRole::Hub && n.status != NodeStatus::Revoked)
            .map(|n| n.public_key.clone())
            .unwrap_or_default()
    };
    RegisterResponse {
        node_id: node_id.clone(),
        status,
        overlay_ip,
        hub_public_key: hub_key,
        hub_endpoint: crate::plan::hub_endpoint(&s.config, &core.projection).unwrap_or_default(),
        server_time_ms: now_ms,
        node_token: core.projection.token_of_node(&node_id).map(str::to_owned),
    }
}

/// `POST /api/v1/agent/sync` — fetch the compiled plan.
pub async fn sync(
    State(s): State<Arc<HubState>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<SyncRequest>,
) -> impl IntoResponse {
    let AuthContext::Node { node_id } = ctx else {
        return HubError::Unauthorized.to_http_response("node token required").into_response();
    };
    if node_id != req.node_id {
        return HubError::Unauthorized
            .to_http_response("token is bound to a different node")
            .into_response();
    }

    let last_hash =
        headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()).map(str::to_owned);

    let config = s.config.clone();
    let result = s
        .transact(move |core| {
            let Some(node) = core.projection.node(&req.node_id) else {
                return err(HubError::NotFound, "unknown node");
            };
            let node = node.clone();
            match node.status {
                NodeStatus::Pending => Ok((vec![], SyncOutcome::Status("pending"))),
                NodeStatus::Revoked => Ok((vec![], SyncOutcome::Status("revoked"))),
                NodeStatus::Suspended => {
                    let mut plan = plan_for_node(&config, &core.projection, &node);
                    plan.peers.clear();
                    plan.firewall_rules = vec![default_deny_rule()];
                    Ok((vec![], SyncOutcome::Plan { plan, directives: vec![Directive::Isolate] }))
                }
                NodeStatus::Active => {
                    core.projection
                        .volatile
                        .last_device_info
                        .insert(node.id.clone(), req.device_info.clone());
                    let plan = plan_for_node(&config, &core.projection, &node);
                    Ok((vec![], SyncOutcome::Plan { plan, directives: vec![] }))
                }
            }
        })
        .await;

    match result {
        Ok((_, SyncOutcome::Status(status))) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "status": status })),
        )
            .into_response(),
        Ok((_, SyncOutcome::Plan { plan, directives })) => {
            let plan_hash = plan.content_hash();
            if last_hash.as_deref() == Some(plan_hash.as_str()) {
                return (StatusCode::NOT_MODIFIED, [(header::ETAG, plan_hash)], ())
                    .into_response();
            }
            (
                [(header::ETAG, plan_hash.clone())],
                Json(SyncResponse { plan_hash, plan, directives }),
            )
                .into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

enum SyncOutcome {
    Status(&'static str),
    Plan { plan: Plan, directives: Vec<Directive> },
}

/// `POST /api/v1/agent/heartbeat` — liveness plus trust inputs.
pub async fn heartbeat(
    State(s): State<Arc<HubState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let AuthContext::Node { node_id } = ctx else {
        return HubError::Unauthorized.to_http_response("node token required").into_response();
    };
    if node_id != req.node_id {
        return HubError::Unauthorized
            .to_http_response("token is bound to a different node")
            .into_response();
    }

    let interval_secs = s.config.heartbeat_interval_secs;
    let result = s
        .transact(move |core| {
            let Some(node) = core.projection.node(&req.node_id) else {
                return err(HubError::NotFound, "unknown node");
            };
            let node = node.clone();
            if node.status == NodeStatus::Revoked {
                return err(HubError::NotApproved, "node is revoked");
            }

            let now_ms = epoch_ms();
            let gap_secs = core
                .projection
                .volatile
                .last_heartbeat_ms
                .get(&node.id)
                .map(|last| now_ms.saturating_sub(*last) / 1000);
            core.projection.volatile.last_heartbeat_ms.insert(node.id.clone(), now_ms);

            let (score, inputs) =
                trust::evaluate(node.role, &req.metrics, gap_secs, interval_secs, node.trust_score);

            let mut events = vec![];
            // Unchanged scores are suppressed to bound log volume.
            if score != node.trust_score {
                let risk = trust::risk_level(score);
                let action = trust::action_for(risk);
                let snapshot = TrustSnapshot {
                    node_id: node.id.clone(),
                    score,
                    previous: node.trust_score,
                    risk,
                    action,
                    calculated_at_ms: now_ms,
                    inputs,
                };
                events.push(ProposedEvent::new(
                    aggregate::NODE,
                    node.id.clone(),
                    DomainEvent::TrustScoreChanged { snapshot },
                ));
                if action == trust::TrustAction::Isolate && node.status == NodeStatus::Active {
                    tracing::warn!(node = %node.id, score, "trust below critical threshold, suspending");
                    events.push(ProposedEvent::new(
                        aggregate::NODE,
                        node.id.clone(),
                        DomainEvent::NodeSuspended {
                            node_id: node.id.clone(),
                            reason: "trust score below critical threshold".to_owned(),
                        },
                    ));
                }
            }
            Ok((events, ()))
        })
        .await;

    match result {
        Ok(_) => {
            Json(HeartbeatResponse { ack: true, next_interval_secs: interval_secs }).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}
