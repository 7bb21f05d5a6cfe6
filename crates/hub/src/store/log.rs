// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed append-only event log.
//!
//! Events are appended as JSONL to `events.jsonl` in the state directory.
//! The full log is mirrored in memory so range scans and catch-up reads
//! never touch the disk; warm start replays the file once. With no state
//! directory (tests) the log is memory-only.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{err, HubError, HubResult};
use crate::model::epoch_ms;
use crate::store::event::{EventRecord, ProposedEvent};

const LOG_FILE: &str = "events.jsonl";

/// Append-only ordered log with per-aggregate optimistic concurrency.
pub struct EventStore {
    path: Option<PathBuf>,
    records: Vec<EventRecord>,
    /// Current version per `type/id` aggregate key.
    versions: HashMap<String, u64>,
    /// `(aggregate_id, request_id)` → event id, for idempotent re-submission.
    requests: HashMap<(String, String), u64>,
}

fn aggregate_key(aggregate_type: &str, aggregate_id: &str) -> String {
    format!("{aggregate_type}/{aggregate_id}")
}

impl EventStore {
    /// Open the log, replaying any existing file in the state directory.
    /// `None` keeps everything in memory.
    pub fn open(state_dir: Option<&Path>) -> anyhow::Result<Self> {
        let path = match state_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Some(dir.join(LOG_FILE))
            }
            None => None,
        };

        let mut store = Self { path, records: Vec::new(), versions: HashMap::new(), requests: HashMap::new() };

        if let Some(ref path) = store.path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                for (lineno, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: EventRecord = serde_json::from_str(line).map_err(|e| {
                        anyhow::anyhow!("corrupt event log at line {}: {e}", lineno + 1)
                    })?;
                    store.index(&record);
                    store.records.push(record);
                }
            }
        }

        Ok(store)
    }

    fn index(&mut self, record: &EventRecord) {
        self.versions.insert(
            aggregate_key(&record.aggregate_type, &record.aggregate_id),
            record.aggregate_version,
        );
        if let Some(ref request_id) = record.request_id {
            self.requests.insert((record.aggregate_id.clone(), request_id.clone()), record.id);
        }
    }

    /// Highest committed event id, or 0 when empty.
    pub fn last_id(&self) -> u64 {
        self.records.last().map(|r| r.id).unwrap_or(0)
    }

    /// Current version of an aggregate, or 0 if it has no events.
    pub fn version(&self, aggregate_type: &str, aggregate_id: &str) -> u64 {
        self.versions.get(&aggregate_key(aggregate_type, aggregate_id)).copied().unwrap_or(0)
    }

    /// Previously committed record for `(aggregate_id, request_id)`, if any.
    pub fn by_request(&self, aggregate_id: &str, request_id: &str) -> Option<&EventRecord> {
        let id = self.requests.get(&(aggregate_id.to_owned(), request_id.to_owned()))?;
        self.records.iter().find(|r| r.id == *id)
    }

    /// Append one event. Rejects a stale `expected_version` with `Conflict`;
    /// the commit is durable before the record is returned.
    pub fn append(&mut self, proposed: ProposedEvent) -> HubResult<EventRecord> {
        // Idempotent re-submission returns the original commit unchanged.
        if let Some(ref request_id) = proposed.request_id {
            if let Some(prior) = self.by_request(&proposed.aggregate_id, request_id) {
                return Ok(prior.clone());
            }
        }

        let key = aggregate_key(proposed.aggregate_type, &proposed.aggregate_id);
        let current = self.versions.get(&key).copied().unwrap_or(0);
        if let Some(expected) = proposed.expected_version {
            if expected != current {
                return err(
                    HubError::Conflict,
                    format!("version mismatch on {key}: expected {expected}, at {current}"),
                );
            }
        }

        let record = EventRecord {
            id: self.last_id() + 1,
            aggregate_type: proposed.aggregate_type.to_owned(),
            aggregate_id: proposed.aggregate_id,
            aggregate_version: current + 1,
            event: proposed.event,
            actor: proposed.actor,
            request_id: proposed.request_id,
            created_at_ms: epoch_ms(),
        };

        if let Some(ref path) = self.path {
            let mut line = serde_json::to_string(&record)
                .map_err(|e| (HubError::Internal, format!("serialize event: {e}")))?;
            line.push('\n');
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| (HubError::Transient, format!("open event log: {e}")))?;
            file.write_all(line.as_bytes())
                .and_then(|_| file.sync_data())
                .map_err(|e| (HubError::Transient, format!("append event log: {e}")))?;
        }

        self.index(&record);
        self.records.push(record.clone());
        Ok(record)
    }

    /// All records with `id > since_id`, in id order.
    pub fn since(&self, since_id: u64) -> Vec<EventRecord> {
        // ids are dense and 1-based, so this is an index into the vec.
        let start = self.records.partition_point(|r| r.id <= since_id);
        self.records[start..].to_vec()
    }

    /// Full history of one aggregate, in version order.
    pub fn replay_aggregate(&self, aggregate_type: &str, aggregate_id: &str) -> Vec<EventRecord> {
        self.records
            .iter()
            .filter(|r| r.aggregate_type == aggregate_type && r.aggregate_id == aggregate_id)
            .cloned()
            .collect()
    }

    /// All records, in id order.
    pub fn all(&self) -> &[EventRecord] {
        &self.records
    }

    /// Path of the backing file, for invariant-violation dumps.
    pub fn log_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
