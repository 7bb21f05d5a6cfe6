// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin surface: node lifecycle, identity CRUD, policy CRUD.
//!
//! Every mutation commits exactly one domain event (plus the IPAM release
//! that revocation implies) and is logged with actor, verb, and target.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ztproto::api::{NodeRole, NodeStatus};
use ztproto::plan::{PortRange, Protocol, RuleAction};

use crate::error::{err, HubError, HubResult};
use crate::model::{
    epoch_ms, AccessAction, AccessPolicy, Group, NetworkPolicy, Node, Resource, Subject,
    TrustSnapshot, User,
};
use crate::state::{Core, HubState};
use crate::store::event::{aggregate, DomainEvent, ProposedEvent};
use crate::token;

// -- health -------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_count: usize,
    pub last_event_id: u64,
}

/// `GET /health`
pub async fn health(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let (node_count, last_event_id) = {
        let core = s.core.read().await;
        (core.projection.nodes().count(), core.store.last_id())
    };
    Json(HealthResponse { status: "running".to_owned(), node_count, last_event_id })
}

// -- node lifecycle -----------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub id: String,
    pub hostname: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_ip: Option<String>,
    pub trust_score: u8,
    pub risk: crate::trust::RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<u64>,
    /// Silent past twice the heartbeat interval.
    pub stale: bool,
    pub agent_version: String,
    pub os_info: String,
    /// Posture from the node's most recent sync, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<ztproto::api::DeviceInfo>,
    pub created_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

fn node_view(s: &HubState, core: &Core, node: &Node, now_ms: u64) -> NodeView {
    let last_heartbeat_ms = core.projection.volatile.last_heartbeat_ms.get(&node.id).copied();
    let stale_after_ms = s.config.heartbeat_interval_secs * 2 * 1000;
    let stale = match last_heartbeat_ms {
        Some(last) => now_ms.saturating_sub(last) > stale_after_ms,
        None => node.status == NodeStatus::Active,
    };
    NodeView {
        id: node.id.clone(),
        hostname: node.hostname.clone(),
        role: node.role,
        status: node.status,
        overlay_ip: node.overlay_ip.map(|ip| ip.to_string()),
        trust_score: node.trust_score,
        risk: crate::trust::risk_level(node.trust_score),
        last_heartbeat_ms,
        stale,
        agent_version: node.agent_version.clone(),
        os_info: node.os_info.clone(),
        device_info: core.projection.volatile.last_device_info.get(&node.id).cloned(),
        created_at_ms: node.created_at_ms,
        approved_by: node.approved_by.clone(),
    }
}

/// `GET /api/v1/admin/nodes`
pub async fn list_nodes(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let now_ms = epoch_ms();
    let core = s.core.read().await;
    let mut views: Vec<NodeView> =
        core.projection.nodes().map(|n| node_view(&s, &core, n, now_ms)).collect();
    views.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Json(views)
}

/// `GET /api/v1/admin/nodes/{id}`
pub async fn get_node(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let now_ms = epoch_ms();
    let core = s.core.read().await;
    match core.projection.node(&id) {
        Some(node) => Json(node_view(&s, &core, node, now_ms)).into_response(),
        None => HubError::NotFound.to_http_response("node not found").into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub approved_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub node_id: String,
    pub status: NodeStatus,
    pub node_token: String,
}

/// `POST /api/v1/admin/nodes/{id}/approve`
pub async fn approve_node(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    body: Option<Json<ApproveRequest>>,
) -> impl IntoResponse {
    let approved_by =
        body.and_then(|Json(b)| b.approved_by).unwrap_or_else(|| "admin".to_owned());
    let result = s
        .transact(|core| {
            let Some(node) = core.projection.node(&id) else {
                return err(HubError::NotFound, "node not found");
            };
            if node.status != NodeStatus::Pending {
                return err(HubError::Conflict, format!("node is {}", node.status));
            }
            let node_token = token::mint();
            let version = core.store.version(aggregate::NODE, &id);
            let event = ProposedEvent::new(
                aggregate::NODE,
                id.clone(),
                DomainEvent::NodeApproved {
                    node_id: id.clone(),
                    approved_by: approved_by.clone(),
                    node_token: node_token.clone(),
                },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], node_token))
        })
        .await;

    match result {
        Ok((_, node_token)) => {
            tracing::info!(node = %id, "node approved");
            Json(ApproveResponse { node_id: id, status: NodeStatus::Active, node_token })
                .into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SuspendRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /api/v1/admin/nodes/{id}/suspend`
pub async fn suspend_node(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    body: Option<Json<SuspendRequest>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "suspended by administrator".to_owned());
    lifecycle_transition(&s, &id, "suspend", move |node| match node.status {
        NodeStatus::Active => Ok(DomainEvent::NodeSuspended { node_id: node.id.clone(), reason }),
        status => Err((HubError::Conflict, format!("node is {status}"))),
    })
    .await
}

/// `POST /api/v1/admin/nodes/{id}/resume`
pub async fn resume_node(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    lifecycle_transition(&s, &id, "resume", |node| match node.status {
        NodeStatus::Suspended => Ok(DomainEvent::NodeResumed { node_id: node.id.clone() }),
        status => Err((HubError::Conflict, format!("node is {status}"))),
    })
    .await
}

/// `POST /api/v1/admin/nodes/{id}/revoke`
///
/// Terminal: blacklists the public key and releases the overlay address
/// (reuse gated by the IPAM cool-down).
pub async fn revoke_node(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(node) = core.projection.node(&id) else {
                return err(HubError::NotFound, "node not found");
            };
            if node.status == NodeStatus::Revoked {
                return err(HubError::Conflict, "node is already revoked");
            }
            let mut events = vec![ProposedEvent::new(
                aggregate::NODE,
                id.clone(),
                DomainEvent::NodeRevoked {
                    node_id: id.clone(),
                    public_key: node.public_key.clone(),
                },
            )
            .actor("admin")];
            if let Some(ip) = node.overlay_ip {
                events.push(ProposedEvent::new(
                    aggregate::IPAM,
                    ip.to_string(),
                    DomainEvent::IpReleased {
                        address: ip,
                        owner_id: id.clone(),
                        released_at_ms: epoch_ms(),
                    },
                ));
            }
            Ok((events, ()))
        })
        .await;

    match result {
        Ok(_) => {
            tracing::info!(node = %id, "node revoked");
            Json(serde_json::json!({ "node_id": id, "status": "revoked" })).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

async fn lifecycle_transition(
    s: &HubState,
    id: &str,
    verb: &str,
    f: impl FnOnce(&Node) -> Result<DomainEvent, (HubError, String)>,
) -> axum::response::Response {
    let result = s
        .transact(|core| {
            let Some(node) = core.projection.node(id) else {
                return err(HubError::NotFound, "node not found");
            };
            let event = f(node)?;
            let version = core.store.version(aggregate::NODE, id);
            Ok((
                vec![ProposedEvent::new(aggregate::NODE, id.to_owned(), event)
                    .actor("admin")
                    .expect_version(version)],
                (),
            ))
        })
        .await;

    match result {
        Ok(_) => {
            tracing::info!(node = %id, verb, "node lifecycle transition");
            let status = s
                .read(|p| p.node(id).map(|n| n.status))
                .await
                .unwrap_or(NodeStatus::Pending);
            Json(serde_json::json!({ "node_id": id, "status": status })).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

/// `GET /api/v1/admin/trust/{id}` — trust history tail, newest last.
pub async fn trust_history(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let history: Option<Vec<TrustSnapshot>> = s
        .read(|p| p.node(&id).map(|_| p.trust_history(&id).to_vec()))
        .await;
    match history {
        Some(history) => Json(history).into_response(),
        None => HubError::NotFound.to_http_response("node not found").into_response(),
    }
}

// -- users --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub department: String,
}

/// `POST /api/v1/access/users`
pub async fn create_user(
    State(s): State<Arc<HubState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let email = req.email.trim().to_lowercase();
            if email.is_empty() || !email.contains('@') {
                return err(HubError::InvalidArgument, "malformed email");
            }
            if core.projection.user_by_subject(&email).is_some() {
                return err(HubError::Conflict, format!("email {email} is registered"));
            }
            let user = User {
                id: Uuid::new_v4().to_string(),
                email,
                display_name: req.display_name.clone(),
                department: req.department.clone(),
                enabled: true,
            };
            let event = ProposedEvent::new(
                aggregate::USER,
                user.id.clone(),
                DomainEvent::UserCreated { user: user.clone() },
            )
            .actor("admin");
            Ok((vec![event], user))
        })
        .await;

    match result {
        Ok((_, user)) => {
            tracing::info!(user = %user.id, email = %user.email, "user created");
            Json(user).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

/// `GET /api/v1/access/users`
pub async fn list_users(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let mut users: Vec<User> = s.read(|p| p.users().cloned().collect()).await;
    users.sort_by(|a, b| a.email.cmp(&b.email));
    Json(users)
}

/// `GET /api/v1/access/users/{id}`
pub async fn get_user(State(s): State<Arc<HubState>>, Path(id): Path<String>) -> impl IntoResponse {
    match s.read(|p| p.user(&id).cloned()).await {
        Some(user) => Json(user).into_response(),
        None => HubError::NotFound.to_http_response("user not found").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `PUT /api/v1/access/users/{id}`
pub async fn update_user(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(existing) = core.projection.user(&id) else {
                return err(HubError::NotFound, "user not found");
            };
            let mut user = existing.clone();
            if let Some(display_name) = req.display_name.clone() {
                user.display_name = display_name;
            }
            if let Some(department) = req.department.clone() {
                user.department = department;
            }
            if let Some(enabled) = req.enabled {
                user.enabled = enabled;
            }
            let version = core.store.version(aggregate::USER, &id);
            let event = ProposedEvent::new(
                aggregate::USER,
                id.clone(),
                DomainEvent::UserUpdated { user: user.clone() },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], user))
        })
        .await;
    respond(result.map(|(_, user)| user))
}

/// `DELETE /api/v1/access/users/{id}`
pub async fn delete_user(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            if core.projection.user(&id).is_none() {
                return err(HubError::NotFound, "user not found");
            }
            let event = ProposedEvent::new(
                aggregate::USER,
                id.clone(),
                DomainEvent::UserDeleted { user_id: id.clone() },
            )
            .actor("admin");
            Ok((vec![event], ()))
        })
        .await;
    respond(result.map(|_| serde_json::json!({ "deleted": id })))
}

// -- groups -------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// `POST /api/v1/access/groups`
pub async fn create_group(
    State(s): State<Arc<HubState>>,
    Json(req): Json<CreateGroupRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let name = req.name.trim().to_owned();
            if name.is_empty() {
                return err(HubError::InvalidArgument, "group name is empty");
            }
            if core.projection.group_by_name(&name).is_some() {
                return err(HubError::Conflict, format!("group {name} exists"));
            }
            let group = Group {
                id: Uuid::new_v4().to_string(),
                name,
                description: req.description.clone(),
                members: Default::default(),
            };
            let event = ProposedEvent::new(
                aggregate::GROUP,
                group.id.clone(),
                DomainEvent::GroupCreated { group: group.clone() },
            )
            .actor("admin");
            Ok((vec![event], group))
        })
        .await;
    respond(result.map(|(_, group)| group))
}

/// `GET /api/v1/access/groups`
pub async fn list_groups(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let mut groups: Vec<Group> = s.read(|p| p.groups().cloned().collect()).await;
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    Json(groups)
}

/// `GET /api/v1/access/groups/{id}`
pub async fn get_group(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.read(|p| resolve_group(p, &id).cloned()).await {
        Some(group) => Json(group).into_response(),
        None => HubError::NotFound.to_http_response("group not found").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub description: Option<String>,
}

/// `PUT /api/v1/access/groups/{id}`
pub async fn update_group(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(existing) = resolve_group(&core.projection, &id) else {
                return err(HubError::NotFound, "group not found");
            };
            let mut group = existing.clone();
            if let Some(description) = req.description.clone() {
                group.description = description;
            }
            let version = core.store.version(aggregate::GROUP, &group.id);
            let event = ProposedEvent::new(
                aggregate::GROUP,
                group.id.clone(),
                DomainEvent::GroupUpdated { group: group.clone() },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], group))
        })
        .await;
    respond(result.map(|(_, group)| group))
}

/// `DELETE /api/v1/access/groups/{id}`
pub async fn delete_group(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(group) = resolve_group(&core.projection, &id) else {
                return err(HubError::NotFound, "group not found");
            };
            let group_id = group.id.clone();
            let event = ProposedEvent::new(
                aggregate::GROUP,
                group_id.clone(),
                DomainEvent::GroupDeleted { group_id: group_id.clone() },
            )
            .actor("admin");
            Ok((vec![event], group_id))
        })
        .await;
    respond(result.map(|(_, id)| serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    /// User id or email.
    pub user_id: String,
}

/// `POST /api/v1/access/groups/{id}/members`
pub async fn add_group_member(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(group) = resolve_group(&core.projection, &id) else {
                return err(HubError::NotFound, "group not found");
            };
            let Some(user) = core.projection.user_by_subject(&req.user_id) else {
                return err(HubError::InvalidArgument, format!("unknown user {}", req.user_id));
            };
            let group_id = group.id.clone();
            let user_id = user.id.clone();
            if group.members.contains(&user_id) {
                return err(HubError::Conflict, "user is already a member");
            }
            let version = core.store.version(aggregate::GROUP, &group_id);
            let event = ProposedEvent::new(
                aggregate::GROUP,
                group_id.clone(),
                DomainEvent::GroupMemberAdded { group_id: group_id.clone(), user_id },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], group_id))
        })
        .await;
    match result {
        Ok((_, group_id)) => {
            let group = s.read(|p| p.group(&group_id).cloned()).await;
            Json(group).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

/// `DELETE /api/v1/access/groups/{id}/members/{user_id}`
pub async fn remove_group_member(
    State(s): State<Arc<HubState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(group) = resolve_group(&core.projection, &id) else {
                return err(HubError::NotFound, "group not found");
            };
            let Some(user) = core.projection.user_by_subject(&user_id) else {
                return err(HubError::NotFound, "user not found");
            };
            let group_id = group.id.clone();
            let member_id = user.id.clone();
            if !group.members.contains(&member_id) {
                return err(HubError::NotFound, "user is not a member");
            }
            let version = core.store.version(aggregate::GROUP, &group_id);
            let event = ProposedEvent::new(
                aggregate::GROUP,
                group_id.clone(),
                DomainEvent::GroupMemberRemoved { group_id: group_id.clone(), user_id: member_id },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], group_id))
        })
        .await;
    match result {
        Ok((_, group_id)) => {
            let group = s.read(|p| p.group(&group_id).cloned()).await;
            Json(group).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

fn resolve_group<'a>(
    p: &'a crate::store::projection::Projection,
    id_or_name: &str,
) -> Option<&'a Group> {
    p.group(id_or_name).or_else(|| p.group_by_name(id_or_name))
}

// -- access policies ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubjectSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub name: String,
    pub subject: SubjectSpec,
    pub resource: ResourceSpec,
    pub action: AccessAction,
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn resolve_subject(core: &Core, spec: &SubjectSpec) -> HubResult<Subject> {
    match spec.kind.as_str() {
        "user" => match core.projection.user_by_subject(&spec.id) {
            Some(user) => Ok(Subject::User { id: user.id.clone() }),
            None => err(HubError::InvalidArgument, format!("unknown user {}", spec.id)),
        },
        "group" => match resolve_group(&core.projection, &spec.id) {
            Some(group) => Ok(Subject::Group { id: group.id.clone() }),
            None => err(HubError::InvalidArgument, format!("unknown group {}", spec.id)),
        },
        other => err(HubError::InvalidArgument, format!("unknown subject type {other}")),
    }
}

fn parse_resource(spec: &ResourceSpec) -> HubResult<Resource> {
    match spec.kind.as_str() {
        "domain" => {
            let pattern = spec.value.trim().to_lowercase();
            if pattern.is_empty() {
                return err(HubError::InvalidArgument, "empty domain pattern");
            }
            Ok(Resource::Domain { pattern })
        }
        "overlay_ip" => {
            let value = spec.value.trim();
            let ok = crate::config::parse_cidr(value).is_some()
                || value.parse::<std::net::Ipv4Addr>().is_ok();
            if !ok {
                return err(HubError::InvalidArgument, format!("malformed cidr {value}"));
            }
            Ok(Resource::OverlayIp { cidr: value.to_owned() })
        }
        "port" => {
            let (proto, range) = spec
                .value
                .split_once('/')
                .ok_or((HubError::InvalidArgument, "port resource is proto/range".to_owned()))?;
            let proto = match proto {
                "tcp" => Protocol::Tcp,
                "udp" => Protocol::Udp,
                "icmp" => Protocol::Icmp,
                "any" => Protocol::Any,
                other => {
                    return err(HubError::InvalidArgument, format!("unknown protocol {other}"))
                }
            };
            let range = PortRange::parse(range)
                .ok_or((HubError::InvalidArgument, format!("malformed port range {range}")))?;
            Ok(Resource::Port { proto, range })
        }
        "role" => match NodeRole::parse(spec.value.trim()) {
            Some(_) => Ok(Resource::Role { name: spec.value.trim().to_owned() }),
            None => err(HubError::InvalidArgument, format!("unknown role {}", spec.value)),
        },
        other => err(HubError::InvalidArgument, format!("unknown resource type {other}")),
    }
}

/// `POST /api/v1/access/policies`
pub async fn create_policy(
    State(s): State<Arc<HubState>>,
    Json(req): Json<PolicyRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let subject = resolve_subject(core, &req.subject)?;
            let resource = parse_resource(&req.resource)?;
            let policy = AccessPolicy {
                id: Uuid::new_v4().to_string(),
                name: req.name.clone(),
                subject,
                resource,
                action: req.action,
                priority: req.priority,
                enabled: req.enabled,
            };
            let event = ProposedEvent::new(
                aggregate::POLICY,
                policy.id.clone(),
                DomainEvent::PolicyCreated { policy: policy.clone() },
            )
            .actor("admin");
            Ok((vec![event], policy))
        })
        .await;
    respond(result.map(|(_, policy)| policy))
}

/// `GET /api/v1/access/policies`
pub async fn list_policies(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let mut policies: Vec<AccessPolicy> = s.read(|p| p.policies().cloned().collect()).await;
    policies.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    Json(policies)
}

/// `GET /api/v1/access/policies/{id}`
pub async fn get_policy(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.read(|p| p.policy(&id).cloned()).await {
        Some(policy) => Json(policy).into_response(),
        None => HubError::NotFound.to_http_response("policy not found").into_response(),
    }
}

/// `PUT /api/v1/access/policies/{id}`
pub async fn update_policy(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<PolicyRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            if core.projection.policy(&id).is_none() {
                return err(HubError::NotFound, "policy not found");
            }
            let subject = resolve_subject(core, &req.subject)?;
            let resource = parse_resource(&req.resource)?;
            let policy = AccessPolicy {
                id: id.clone(),
                name: req.name.clone(),
                subject,
                resource,
                action: req.action,
                priority: req.priority,
                enabled: req.enabled,
            };
            let version = core.store.version(aggregate::POLICY, &id);
            let event = ProposedEvent::new(
                aggregate::POLICY,
                id.clone(),
                DomainEvent::PolicyUpdated { policy: policy.clone() },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], policy))
        })
        .await;
    respond(result.map(|(_, policy)| policy))
}

/// `DELETE /api/v1/access/policies/{id}`
pub async fn delete_policy(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            if core.projection.policy(&id).is_none() {
                return err(HubError::NotFound, "policy not found");
            }
            let event = ProposedEvent::new(
                aggregate::POLICY,
                id.clone(),
                DomainEvent::PolicyDeleted { policy_id: id.clone() },
            )
            .actor("admin");
            Ok((vec![event], ()))
        })
        .await;
    respond(result.map(|_| serde_json::json!({ "deleted": id })))
}

// -- network policies ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NetworkPolicyRequest {
    pub src_role: NodeRole,
    pub dst_role: NodeRole,
    pub protocol: Protocol,
    /// `"5432"`, `"8000-9000"`, or absent for any port.
    #[serde(default)]
    pub port: Option<String>,
    pub action: RuleAction,
    pub priority: i32,
}

fn parse_network_policy(id: String, req: &NetworkPolicyRequest) -> HubResult<NetworkPolicy> {
    let port = match &req.port {
        Some(raw) => Some(
            PortRange::parse(raw)
                .ok_or((HubError::InvalidArgument, format!("malformed port range {raw}")))?,
        ),
        None => None,
    };
    Ok(NetworkPolicy {
        id,
        src_role: req.src_role,
        dst_role: req.dst_role,
        protocol: req.protocol,
        port,
        action: req.action,
        priority: req.priority,
    })
}

/// `POST /api/v1/admin/network-policies`
pub async fn create_network_policy(
    State(s): State<Arc<HubState>>,
    Json(req): Json<NetworkPolicyRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|_core| {
            let policy = parse_network_policy(Uuid::new_v4().to_string(), &req)?;
            let event = ProposedEvent::new(
                aggregate::NETWORK_POLICY,
                policy.id.clone(),
                DomainEvent::NetworkPolicyCreated { policy: policy.clone() },
            )
            .actor("admin");
            Ok((vec![event], policy))
        })
        .await;
    respond(result.map(|(_, policy)| policy))
}

/// `GET /api/v1/admin/network-policies`
pub async fn list_network_policies(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let policies: Vec<NetworkPolicy> =
        s.read(|p| p.network_policies().into_iter().cloned().collect()).await;
    Json(policies)
}

/// `PUT /api/v1/admin/network-policies/{id}`
pub async fn update_network_policy(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<NetworkPolicyRequest>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            if core.projection.network_policy(&id).is_none() {
                return err(HubError::NotFound, "network policy not found");
            }
            let policy = parse_network_policy(id.clone(), &req)?;
            let version = core.store.version(aggregate::NETWORK_POLICY, &id);
            let event = ProposedEvent::new(
                aggregate::NETWORK_POLICY,
                id.clone(),
                DomainEvent::NetworkPolicyUpdated { policy: policy.clone() },
            )
            .actor("admin")
            .expect_version(version);
            Ok((vec![event], policy))
        })
        .await;
    respond(result.map(|(_, policy)| policy))
}

/// `DELETE /api/v1/admin/network-policies/{id}`
pub async fn delete_network_policy(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            if core.projection.network_policy(&id).is_none() {
                return err(HubError::NotFound, "network policy not found");
            }
            let event = ProposedEvent::new(
                aggregate::NETWORK_POLICY,
                id.clone(),
                DomainEvent::NetworkPolicyDeleted { policy_id: id.clone() },
            )
            .actor("admin");
            Ok((vec![event], ()))
        })
        .await;
    respond(result.map(|_| serde_json::json!({ "deleted": id })))
}

// -- shared -------------------------------------------------------------------

fn respond<T: Serialize>(result: Result<T, (HubError, String)>) -> axum::response::Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}
