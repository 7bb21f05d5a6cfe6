// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-device endpoints: provisioning, one-shot config delivery, QR.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{generate_keypair, render_profile, render_qr, seal_private_key, unseal_private_key};
use crate::error::{err, HubError, HubResult};
use crate::ipam::{self, Pool};
use crate::model::{epoch_ms, ClientDevice, DeviceStatus, DeviceType, TunnelMode};
use crate::state::{Core, HubState};
use crate::store::event::{aggregate, DomainEvent, ProposedEvent};
use crate::token;

#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    /// Owning user id or email.
    pub user_id: String,
    pub name: String,
    pub device_type: DeviceType,
    #[serde(default = "default_tunnel_mode")]
    pub tunnel_mode: TunnelMode,
    #[serde(default)]
    pub expires_days: Option<u32>,
    /// Single-use tokens are consumed on first retrieval.
    #[serde(default)]
    pub single_use: bool,
}

fn default_tunnel_mode() -> TunnelMode {
    TunnelMode::Split
}

/// Public view of a device; sealed key material never leaves the store.
#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub overlay_ip: String,
    pub tunnel_mode: TunnelMode,
    pub status: DeviceStatus,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub public_key: String,
}

fn device_view(device: &ClientDevice, now_ms: u64) -> DeviceView {
    DeviceView {
        id: device.id.clone(),
        user_id: device.user_id.clone(),
        name: device.name.clone(),
        device_type: device.device_type,
        overlay_ip: device.overlay_ip.to_string(),
        tunnel_mode: device.tunnel_mode,
        status: device.effective_status(now_ms),
        created_at_ms: device.created_at_ms,
        expires_at_ms: device.expires_at_ms,
        public_key: device.public_key.clone(),
    }
}

#[derive(Debug, Serialize)]
pub struct CreateDeviceResponse {
    #[serde(flatten)]
    pub device: DeviceView,
    pub config_token: String,
    /// Delivered once; held sealed afterwards.
    pub private_key: String,
    pub profile: String,
}

/// `POST /api/v1/client/devices`
pub async fn create_device(
    State(s): State<Arc<HubState>>,
    Json(req): Json<CreateDeviceRequest>,
) -> impl IntoResponse {
    let config = s.config.clone();
    let result = s
        .transact(move |core| {
            let now_ms = epoch_ms();
            let Some(user) = core.projection.user_by_subject(&req.user_id) else {
                return err(HubError::InvalidArgument, format!("unknown user {}", req.user_id));
            };
            let user_id = user.id.clone();

            let active = core
                .projection
                .devices_of_user(&user_id)
                .filter(|d| d.effective_status(now_ms) == DeviceStatus::Active)
                .count();
            if active >= config.client_max_devices_per_user as usize {
                return err(HubError::Conflict, "device limit reached for user");
            }

            let overlay_ip = ipam::allocate(&config, &core.projection, Pool::Client, now_ms)?;

            let keypair = generate_keypair();
            let sealed = seal_private_key(&config, &keypair.private_key)?;
            let expires_days =
                req.expires_days.unwrap_or(config.client_default_expires_days);
            let device = ClientDevice {
                id: Uuid::new_v4().to_string(),
                user_id,
                name: req.name.clone(),
                device_type: req.device_type,
                overlay_ip,
                tunnel_mode: req.tunnel_mode,
                status: DeviceStatus::Active,
                created_at_ms: now_ms,
                expires_at_ms: now_ms + u64::from(expires_days) * 24 * 3600 * 1000,
                public_key: keypair.public_key.clone(),
                sealed_private_key: sealed,
                config_token: token::mint(),
                token_single_use: req.single_use,
                token_consumed: false,
            };

            let profile = render_profile(&config, &core.projection, &device, &keypair.private_key);

            let events = vec![
                ProposedEvent::new(
                    aggregate::IPAM,
                    overlay_ip.to_string(),
                    DomainEvent::IpAllocated {
                        address: overlay_ip,
                        pool: Pool::Client.as_str().to_owned(),
                        owner_id: device.id.clone(),
                    },
                )
                .actor("admin"),
                ProposedEvent::new(
                    aggregate::DEVICE,
                    device.id.clone(),
                    DomainEvent::DeviceCreated { device: device.clone() },
                )
                .actor("admin"),
            ];

            let resp = CreateDeviceResponse {
                device: device_view(&device, now_ms),
                config_token: device.config_token.clone(),
                private_key: keypair.private_key,
                profile,
            };
            Ok((events, resp))
        })
        .await;

    match result {
        Ok((_, resp)) => {
            tracing::info!(device = %resp.device.id, user = %resp.device.user_id, "device provisioned");
            Json(resp).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

/// `GET /api/v1/client/devices`
pub async fn list_devices(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let now_ms = epoch_ms();
    let mut views: Vec<DeviceView> =
        s.read(|p| p.devices().map(|d| device_view(d, now_ms)).collect()).await;
    views.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
    Json(views)
}

/// `DELETE /api/v1/client/devices/{id}` — explicit revocation.
pub async fn revoke_device(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = s
        .transact(|core| {
            let Some(device) = core.projection.device(&id) else {
                return err(HubError::NotFound, "device not found");
            };
            if device.status == DeviceStatus::Revoked {
                return err(HubError::Conflict, "device is already revoked");
            }
            let overlay_ip = device.overlay_ip;
            let events = vec![
                ProposedEvent::new(
                    aggregate::DEVICE,
                    id.clone(),
                    DomainEvent::DeviceRevoked {
                        device_id: id.clone(),
                        reason: "revoked by administrator".to_owned(),
                    },
                )
                .actor("admin"),
                ProposedEvent::new(
                    aggregate::IPAM,
                    overlay_ip.to_string(),
                    DomainEvent::IpReleased {
                        address: overlay_ip,
                        owner_id: id.clone(),
                        released_at_ms: epoch_ms(),
                    },
                ),
            ];
            Ok((events, ()))
        })
        .await;

    match result {
        Ok(_) => {
            tracing::info!(device = %id, "device revoked");
            Json(serde_json::json!({ "device_id": id, "status": "revoked" })).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

// -- one-shot config delivery -------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DeviceConfigResponse {
    pub device_id: String,
    pub name: String,
    pub expires_at_ms: u64,
    pub overlay_ip: String,
    pub private_key: String,
    pub profile: String,
}

/// Resolve a config token to the device profile, consuming single-use
/// tokens. Invalid, expired, and consumed tokens are indistinguishable.
async fn retrieve(s: &HubState, raw_token: &str) -> HubResult<DeviceConfigResponse> {
    let config = s.config.clone();
    let raw_token = raw_token.to_owned();
    let (_, resp) = s
        .transact(move |core: &mut Core| {
            let now_ms = epoch_ms();
            let Some(device) = core.projection.device_by_token(&raw_token) else {
                return err(HubError::NotFound, "unknown config token");
            };
            if device.effective_status(now_ms) != DeviceStatus::Active {
                return err(HubError::NotFound, "unknown config token");
            }
            if device.token_single_use && device.token_consumed {
                return err(HubError::NotFound, "unknown config token");
            }
            let device = device.clone();

            let private_key = unseal_private_key(&config, &device.sealed_private_key)?;
            let profile = render_profile(&config, &core.projection, &device, &private_key);

            let mut events = vec![];
            if device.token_single_use {
                events.push(ProposedEvent::new(
                    aggregate::DEVICE,
                    device.id.clone(),
                    DomainEvent::DeviceConfigRetrieved { device_id: device.id.clone() },
                ));
            }

            let resp = DeviceConfigResponse {
                device_id: device.id.clone(),
                name: device.name.clone(),
                expires_at_ms: device.expires_at_ms,
                overlay_ip: device.overlay_ip.to_string(),
                private_key,
                profile,
            };
            Ok((events, resp))
        })
        .await?;
    Ok(resp)
}

/// `GET /api/v1/client/config/{token}`
pub async fn device_config(
    State(s): State<Arc<HubState>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match retrieve(&s, &token).await {
        Ok(resp) => Json(resp).into_response(),
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

/// `GET /api/v1/client/config/{token}/raw` — plain profile text.
pub async fn device_config_raw(
    State(s): State<Arc<HubState>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match retrieve(&s, &token).await {
        Ok(resp) => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], resp.profile).into_response()
        }
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

/// `GET /api/v1/client/config/{token}/qr` — QR encoding of the profile text.
pub async fn device_config_qr(
    State(s): State<Arc<HubState>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match retrieve(&s, &token).await {
        Ok(resp) => match render_qr(&resp.profile) {
            Ok(qr) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], qr).into_response(),
            Err((code, msg)) => code.to_http_response(msg).into_response(),
        },
        Err((code, msg)) => code.to_http_response(msg).into_response(),
    }
}

