// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-device provisioning: keypairs, tunnel profiles, QR rendering.

use base64::Engine;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::HubConfig;
use crate::error::{err, HubError, HubResult};
use crate::model::{ClientDevice, TunnelMode};
use crate::store::projection::Projection;
use crate::token;

const B64_STD: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// A freshly generated X25519 keypair, base64-encoded WireGuard style.
pub struct DeviceKeypair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a device keypair server-side. The secret bytes are clamped by
/// the curve implementation.
pub fn generate_keypair() -> DeviceKeypair {
    let mut secret_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut secret_bytes);
    let secret = StaticSecret::from(secret_bytes);
    let public = PublicKey::from(&secret);
    DeviceKeypair {
        private_key: B64_STD.encode(secret.to_bytes()),
        public_key: B64_STD.encode(public.to_bytes()),
    }
}

/// Seal a device private key under the master secret for at-rest storage.
pub fn seal_private_key(config: &HubConfig, private_key: &str) -> HubResult<String> {
    let Some(ref master) = config.secret_key else {
        return err(HubError::Internal, "SECRET_KEY is not configured");
    };
    token::seal(master, private_key.as_bytes())
}

/// Recover a device private key sealed by [`seal_private_key`].
pub fn unseal_private_key(config: &HubConfig, sealed: &str) -> HubResult<String> {
    let Some(ref master) = config.secret_key else {
        return err(HubError::Internal, "SECRET_KEY is not configured");
    };
    let bytes = token::open(master, sealed)?;
    String::from_utf8(bytes).map_err(|_| (HubError::Internal, "sealed key is not utf-8".to_owned()))
}

/// Render the ready-to-import tunnel profile for a device.
///
/// Full-tunnel devices route everything through the hub (NAT egress);
/// split-tunnel devices route only the overlay.
pub fn render_profile(
    config: &HubConfig,
    projection: &Projection,
    device: &ClientDevice,
    private_key: &str,
) -> String {
    let (_, prefix) = config.overlay_cidr();
    let allowed = match device.tunnel_mode {
        TunnelMode::Full => "0.0.0.0/0".to_owned(),
        TunnelMode::Split => config.overlay_network.clone(),
    };
    let hub_key =
        projection.hub_node().map(|n| n.public_key.clone()).unwrap_or_default();
    let endpoint = crate::plan::hub_endpoint(config, projection).unwrap_or_default();

    let mut profile = String::new();
    profile.push_str("[Interface]\n");
    profile.push_str(&format!("PrivateKey = {private_key}\n"));
    profile.push_str(&format!("Address = {}/{prefix}\n", device.overlay_ip));
    if let Some(ref dns) = config.client_dns {
        profile.push_str(&format!("DNS = {dns}\n"));
    }
    profile.push('\n');
    profile.push_str("[Peer]\n");
    profile.push_str(&format!("PublicKey = {hub_key}\n"));
    if !endpoint.is_empty() {
        profile.push_str(&format!("Endpoint = {endpoint}\n"));
    }
    profile.push_str(&format!("AllowedIPs = {allowed}\n"));
    profile.push_str("PersistentKeepalive = 25\n");
    profile
}

/// Render the profile as a terminal-friendly QR code.
pub fn render_qr(profile: &str) -> HubResult<String> {
    let code = qrcode::QrCode::new(profile.as_bytes())
        .map_err(|e| (HubError::Internal, format!("qr encoding failed: {e}")))?;
    Ok(code.render::<char>().quiet_zone(true).module_dimensions(2, 1).build())
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
