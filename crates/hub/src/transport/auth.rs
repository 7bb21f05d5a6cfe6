// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request authentication: admin shared secret and node bearer tokens.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::HubError;
use crate::state::HubState;
use crate::token::constant_time_eq;

/// Who a request acts as, resolved by the auth middleware.
#[derive(Debug, Clone)]
pub enum AuthContext {
    Admin,
    Node { node_id: String },
}

/// Validate the `X-Admin-Token` header. `None` expected disables admin auth.
pub fn validate_admin(headers: &HeaderMap, expected: Option<&str>) -> Result<(), HubError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };
    let header =
        headers.get("x-admin-token").and_then(|v| v.to_str().ok()).ok_or(HubError::Unauthorized)?;
    if constant_time_eq(header, expected) {
        Ok(())
    } else {
        Err(HubError::Unauthorized)
    }
}

/// Extract the bearer token from HTTP headers.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn unauthorized() -> Response {
    let body = crate::error::ErrorResponse {
        error: HubError::Unauthorized.to_error_body("unauthorized"),
    };
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}

/// Axum middleware that authenticates every route class.
///
/// Exempt: `/health`, `/api/v1/agent/register` (pre-identity), and
/// `/api/v1/client/config/` (the config token is the credential).
/// Agent routes take a node bearer token; `evaluate` and the event stream
/// take either credential; everything else is admin-only.
pub async fn auth_layer(
    state: State<Arc<HubState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();

    if path == "/health"
        || path == "/api/v1/agent/register"
        || path.starts_with("/api/v1/client/config/")
    {
        return next.run(req).await;
    }

    let admin_ok = validate_admin(req.headers(), state.config.admin_secret.as_deref()).is_ok();

    let node = match bearer_token(req.headers()) {
        Some(token) => {
            let token = token.to_owned();
            state.read(|p| p.node_by_token(&token).map(|n| (n.id.clone(), n.status))).await
        }
        None => None,
    };

    let ctx = if path.starts_with("/api/v1/agent/") {
        // Revoked tokens still reach sync/heartbeat so the agent can learn
        // its terminal status; the handlers gate on it.
        match node {
            Some((node_id, _)) => AuthContext::Node { node_id },
            None => return unauthorized(),
        }
    } else if path == "/api/v1/access/evaluate" || path == "/api/v1/events" {
        match (admin_ok, node) {
            (_, Some((node_id, status))) => {
                if status == ztproto::api::NodeStatus::Revoked {
                    return unauthorized();
                }
                AuthContext::Node { node_id }
            }
            (true, None) => AuthContext::Admin,
            (false, None) => return unauthorized(),
        }
    } else {
        // Admin surface: lifecycle, identity, policies, devices.
        if admin_ok {
            AuthContext::Admin
        } else {
            return unauthorized();
        }
    };

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
