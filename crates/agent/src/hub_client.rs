// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the hub agent protocol.
//!
//! Transient failures (connect errors, 5xx) are retried by callers with
//! exponential backoff capped at 60 s; permanent rejections (4xx) are not.

use reqwest::StatusCode;
use serde_json::Value;

use ztproto::api::{
    HeartbeatMetrics, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    SyncRequest, SyncResponse,
};

use crate::error::{AgentError, AgentResult};

/// Backoff cap for transient-error retries.
pub const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(60);

/// Next backoff step: doubled with jitter, capped.
pub fn next_backoff(current: std::time::Duration) -> std::time::Duration {
    use rand::Rng;
    let doubled = current.saturating_mul(2).min(MAX_BACKOFF);
    let jitter_ms = rand::rng().random_range(0..=doubled.as_millis().min(1000) as u64);
    (doubled + std::time::Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
}

/// Outcome of a sync call.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Plan unchanged since the hash we sent.
    NotModified,
    /// A new plan (and possibly directives).
    Plan(Box<SyncResponse>),
    /// Not yet approved; keep polling register.
    Pending,
    /// Terminal: tear down and idle.
    Revoked,
}

pub struct HubClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HubClient {
    pub fn new(hub_url: &str, token: Option<String>) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::Internal(format!("http client: {e}")))?;
        Ok(Self { base: hub_url.trim_end_matches('/').to_owned(), token, http })
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// `POST /api/v1/agent/register`. Idempotent; safe to poll.
    pub async fn register(&self, req: &RegisterRequest) -> AgentResult<RegisterResponse> {
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/agent/register")
            .json(req)
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("register: {e}")))?;

        match resp.status() {
            status if status.is_success() => resp
                .json()
                .await
                .map_err(|e| AgentError::Internal(format!("register body: {e}"))),
            StatusCode::CONFLICT => {
                Err(AgentError::Conflict(error_message(resp).await))
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Err(AgentError::Auth(error_message(resp).await))
            }
            status if status.is_server_error() => {
                Err(AgentError::Network(format!("register: hub returned {status}")))
            }
            status => Err(AgentError::Internal(format!("register: hub returned {status}"))),
        }
    }

    /// `POST /api/v1/agent/sync` with `If-None-Match` short-circuit.
    pub async fn sync(
        &self,
        node_id: &str,
        last_hash: Option<&str>,
        device_info: ztproto::api::DeviceInfo,
    ) -> AgentResult<SyncOutcome> {
        let body = SyncRequest { node_id: node_id.to_owned(), device_info };
        let mut req = self.request(reqwest::Method::POST, "/api/v1/agent/sync").json(&body);
        if let Some(hash) = last_hash {
            req = req.header(reqwest::header::IF_NONE_MATCH, hash);
        }
        let resp = req.send().await.map_err(|e| AgentError::Network(format!("sync: {e}")))?;

        match resp.status() {
            StatusCode::NOT_MODIFIED => Ok(SyncOutcome::NotModified),
            status if status.is_success() => {
                let parsed: SyncResponse = resp
                    .json()
                    .await
                    .map_err(|e| AgentError::Internal(format!("sync body: {e}")))?;
                Ok(SyncOutcome::Plan(Box::new(parsed)))
            }
            StatusCode::FORBIDDEN => {
                let body: Value = resp.json().await.unwrap_or(Value::Null);
                match body.get("status").and_then(|s| s.as_str()) {
                    Some("pending") => Ok(SyncOutcome::Pending),
                    Some("revoked") => Ok(SyncOutcome::Revoked),
                    _ => Err(AgentError::Auth("sync rejected".to_owned())),
                }
            }
            StatusCode::UNAUTHORIZED => Err(AgentError::Auth("node token rejected".to_owned())),
            status if status.is_server_error() => {
                Err(AgentError::Network(format!("sync: hub returned {status}")))
            }
            status => Err(AgentError::Internal(format!("sync: hub returned {status}"))),
        }
    }

    /// `POST /api/v1/agent/heartbeat`.
    pub async fn heartbeat(
        &self,
        node_id: &str,
        metrics: HeartbeatMetrics,
    ) -> AgentResult<HeartbeatResponse> {
        let body = HeartbeatRequest { node_id: node_id.to_owned(), metrics };
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/agent/heartbeat")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("heartbeat: {e}")))?;

        match resp.status() {
            status if status.is_success() => resp
                .json()
                .await
                .map_err(|e| AgentError::Internal(format!("heartbeat body: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AgentError::Auth(error_message(resp).await))
            }
            status if status.is_server_error() => {
                Err(AgentError::Network(format!("heartbeat: hub returned {status}")))
            }
            status => Err(AgentError::Internal(format!("heartbeat: hub returned {status}"))),
        }
    }

    /// `GET /api/v1/events` — the long-running NDJSON stream response.
    pub async fn events(&self, since_id: u64) -> AgentResult<reqwest::Response> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/events")
            .query(&[("since_id", since_id.to_string())])
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("events: {e}")))?;
        if !resp.status().is_success() {
            return Err(AgentError::Network(format!("events: hub returned {}", resp.status())));
        }
        Ok(resp)
    }
}

async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("hub returned {status}"))
}

#[cfg(test)]
#[path = "hub_client_tests.rs"]
mod tests;
