// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fan-out of committed events to live stream subscribers.
//!
//! Delivery is at-least-once in id order per subscriber: the broadcast
//! channel is bounded, and a receiver that observes `Lagged` re-reads the
//! event store from its cursor. Frames are redacted — tokens and sealed
//! keys never leave the store.

use tokio::sync::broadcast;

use ztproto::api::StreamFrame;

use crate::store::event::{DomainEvent, EventRecord};

/// Bounded fan-out buffer; slow subscribers past this fall back to the store.
const BUS_CAPACITY: usize = 256;

/// A frame on the in-process bus, tagged with routing metadata.
#[derive(Debug, Clone)]
pub struct BusFrame {
    pub frame: StreamFrame,
    /// Whether node subscribers should see this frame.
    pub plan_affecting: bool,
}

/// Publishes every committed domain event.
pub struct EventBus {
    tx: broadcast::Sender<BusFrame>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe for live frames. Callers must handle `Lagged` by re-reading
    /// the event store from their cursor.
    pub fn subscribe(&self) -> broadcast::Receiver<BusFrame> {
        self.tx.subscribe()
    }

    /// Publish a committed record. Send errors (no subscribers) are fine.
    pub fn publish(&self, record: &EventRecord) {
        let _ = self.tx.send(BusFrame {
            frame: frame_for(record),
            plan_affecting: record.event.affects_plans(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the public stream frame for a committed record.
///
/// Secret-bearing events are reduced to their identifiers; everything else
/// carries its payload verbatim.
pub fn frame_for(record: &EventRecord) -> StreamFrame {
    let payload = match &record.event {
        DomainEvent::NodeApproved { node_id, approved_by, .. } => {
            serde_json::json!({ "node_id": node_id, "approved_by": approved_by })
        }
        DomainEvent::DeviceCreated { device } => {
            serde_json::json!({
                "device_id": device.id,
                "user_id": device.user_id,
                "overlay_ip": device.overlay_ip,
                "public_key": device.public_key,
                "expires_at_ms": device.expires_at_ms,
            })
        }
        event => serde_json::to_value(event)
            .ok()
            .and_then(|v| v.get("payload").cloned())
            .unwrap_or(serde_json::Value::Null),
    };

    StreamFrame { id: record.id, kind: record.event.kind().to_owned(), payload }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
