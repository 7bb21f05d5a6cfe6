// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted node identity: keypair, node id, bearer token.
//!
//! Written to `identity.json` in the state directory with owner-only
//! permissions. The private key never leaves this host.

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{AgentError, AgentResult};

const IDENTITY_FILE: &str = "identity.json";
const B64_STD: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// WireGuard private key, base64.
    pub private_key: String,
    /// WireGuard public key, base64.
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_token: Option<String>,
}

impl NodeIdentity {
    fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(IDENTITY_FILE)
    }

    /// Load the persisted identity or generate a fresh keypair.
    pub fn load_or_generate(state_dir: &Path) -> AgentResult<Self> {
        let path = Self::path(state_dir);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| AgentError::Config(format!("read {}: {e}", path.display())))?;
            return serde_json::from_str(&contents)
                .map_err(|e| AgentError::Config(format!("parse {}: {e}", path.display())));
        }

        let mut secret_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut secret_bytes);
        let secret = StaticSecret::from(secret_bytes);
        let public = PublicKey::from(&secret);
        let identity = Self {
            private_key: B64_STD.encode(secret.to_bytes()),
            public_key: B64_STD.encode(public.to_bytes()),
            node_id: None,
            node_token: None,
        };
        identity.persist(state_dir)?;
        Ok(identity)
    }

    /// Write the identity back to disk (0600 on unix).
    pub fn persist(&self, state_dir: &Path) -> AgentResult<()> {
        std::fs::create_dir_all(state_dir)
            .map_err(|e| AgentError::Config(format!("create {}: {e}", state_dir.display())))?;
        let path = Self::path(state_dir);
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AgentError::Internal(format!("serialize identity: {e}")))?;
        std::fs::write(&path, contents)
            .map_err(|e| AgentError::Config(format!("write {}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }

    /// Drop enrollment (id + token) but keep the keypair. Used when the hub
    /// rejects our token but the key is still registered.
    pub fn clear_enrollment(&mut self, state_dir: &Path) -> AgentResult<()> {
        self.node_id = None;
        self.node_token = None;
        self.persist(state_dir)
    }

    /// Discard the identity entirely and mint a fresh keypair. Used on
    /// `reenroll` and key rotation, where the old key may be blacklisted.
    pub fn regenerate(state_dir: &Path) -> AgentResult<Self> {
        let path = Self::path(state_dir);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| AgentError::Config(format!("remove {}: {e}", path.display())))?;
        }
        Self::load_or_generate(state_dir)
    }

    /// Write the private key to a file readable only by root, for `wg set`.
    pub fn private_key_file(&self, state_dir: &Path) -> AgentResult<PathBuf> {
        let path = state_dir.join("wg.key");
        std::fs::write(&path, &self.private_key)
            .map_err(|e| AgentError::Config(format!("write {}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(path)
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
