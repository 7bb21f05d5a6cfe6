// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live event stream — one long-running response of newline-delimited JSON.
//!
//! Subscribers pass a cursor (`since_id`); the handler replays the store
//! from the cursor, then forwards live bus frames in id order. A receiver
//! that lags the bounded bus buffer is caught up from the store again, so
//! delivery is at-least-once and never out of order. Keepalive pings flow
//! every 25 s (configurable); their id is 0 and must not advance cursors.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Extension;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use ztproto::api::StreamFrame;

use crate::bus::frame_for;
use crate::state::HubState;
use crate::transport::auth::AuthContext;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub since_id: u64,
}

/// `GET /api/v1/events` — NDJSON event stream.
///
/// Node subscribers only receive plan-affecting events; admin subscribers
/// see everything.
pub async fn events(
    State(s): State<Arc<HubState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let plan_events_only = matches!(ctx, AuthContext::Node { .. });
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, Infallible>>(64);

    tokio::spawn(pump(s, tx, query.since_id, plan_events_only));

    let body = Body::from_stream(ReceiverStream::new(rx));
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body)
}

fn render(frame: &StreamFrame) -> Option<String> {
    serde_json::to_string(frame).ok().map(|mut line| {
        line.push('\n');
        line
    })
}

/// Drive one subscriber until it disconnects or the hub shuts down.
async fn pump(
    s: Arc<HubState>,
    tx: tokio::sync::mpsc::Sender<Result<String, Infallible>>,
    since_id: u64,
    plan_events_only: bool,
) {
    let mut rx = s.bus.subscribe();
    let mut cursor = since_id;
    let mut keepalive = tokio::time::interval(s.config.stream_keepalive());
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Catch up from the store before going live.
    if !catch_up(&s, &tx, &mut cursor, plan_events_only).await {
        return;
    }

    loop {
        tokio::select! {
            _ = s.shutdown.cancelled() => break,
            _ = keepalive.tick() => {
                if let Some(line) = render(&StreamFrame::ping()) {
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(bus_frame) => {
                        if bus_frame.frame.id <= cursor {
                            continue;
                        }
                        // A gap means the bus buffer wrapped between frames;
                        // backfill from the store to keep id order.
                        if bus_frame.frame.id > cursor + 1
                            && !catch_up(&s, &tx, &mut cursor, plan_events_only).await
                        {
                            break;
                        }
                        if bus_frame.frame.id <= cursor {
                            continue;
                        }
                        cursor = bus_frame.frame.id;
                        if plan_events_only && !bus_frame.plan_affecting {
                            continue;
                        }
                        if let Some(line) = render(&bus_frame.frame) {
                            if tx.send(Ok(line)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "stream subscriber lagged, re-reading store");
                        if !catch_up(&s, &tx, &mut cursor, plan_events_only).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Send all store records past the cursor. Returns false when the client is
/// gone.
async fn catch_up(
    s: &HubState,
    tx: &tokio::sync::mpsc::Sender<Result<String, Infallible>>,
    cursor: &mut u64,
    plan_events_only: bool,
) -> bool {
    let records = s.events_since(*cursor).await;
    for record in records {
        *cursor = record.id;
        if plan_events_only && !record.event.affects_plans() {
            continue;
        }
        if let Some(line) = render(&frame_for(&record)) {
            if tx.send(Ok(line)).await.is_err() {
                return false;
            }
        }
    }
    true
}

