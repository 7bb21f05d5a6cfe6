// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `zthub` binary as a subprocess and exercises it over
//! HTTP, including the agent protocol and the NDJSON event stream.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to a compiled workspace binary.
pub fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `zthub` process that is killed on drop.
pub struct HubProcess {
    child: Child,
    port: u16,
    pub admin_secret: String,
    _state_dir: Option<tempfile::TempDir>,
}

impl HubProcess {
    /// Spawn a hub with a fresh state directory on a free port.
    pub fn start() -> anyhow::Result<Self> {
        let state_dir = tempfile::tempdir()?;
        let mut hub = Self::start_with_state(state_dir.path())?;
        hub._state_dir = Some(state_dir);
        Ok(hub)
    }

    /// Spawn a hub against an existing state directory (restart tests).
    pub fn start_with_state(state_dir: &Path) -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = workspace_binary("zthub");
        anyhow::ensure!(binary.exists(), "zthub binary not found at {}", binary.display());

        let port = free_port()?;
        let admin_secret = "spec-admin-secret".to_owned();

        let child = Command::new(&binary)
            .env("ZT_HUB_HOST", "127.0.0.1")
            .env("HUB_API_PORT", port.to_string())
            .env("ADMIN_SECRET", &admin_secret)
            .env("SECRET_KEY", "spec-master-secret")
            .env("ZT_HUB_STATE_DIR", state_dir)
            .env("HUB_ENDPOINT", "203.0.113.1:51820")
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, admin_secret, _state_dir: None })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll `/health` until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("zthub did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for HubProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
