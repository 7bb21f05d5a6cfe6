// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access-decision endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use ztproto::api::EvaluateRequest;

use crate::policy::evaluate_access;
use crate::state::HubState;

/// `POST /api/v1/access/evaluate` — pure access decision over the current
/// projection.
pub async fn evaluate(
    State(s): State<Arc<HubState>>,
    Json(req): Json<EvaluateRequest>,
) -> impl IntoResponse {
    let resp = s.read(|p| evaluate_access(p, &req.subject, &req.resource)).await;
    tracing::debug!(
        subject = %req.subject,
        resource = %req.resource,
        allowed = resp.allowed,
        "access evaluated"
    );
    Json(resp)
}
