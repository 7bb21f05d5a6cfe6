// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared hub state: the single event store, its projection, and the bus.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::store::event::{aggregate, DomainEvent, EventRecord, ProposedEvent};
use crate::store::log::EventStore;
use crate::store::projection::Projection;

/// Current event-log schema version; bumps are themselves events.
const SCHEMA_VERSION: u32 = 1;

/// Write-side state guarded by a single lock. Commit and projection update
/// happen under it, so readers never observe a half-applied commit.
pub struct Core {
    pub store: EventStore,
    pub projection: Projection,
}

/// Shared hub state.
pub struct HubState {
    pub config: HubConfig,
    pub core: RwLock<Core>,
    pub bus: EventBus,
    pub shutdown: CancellationToken,
    /// Set when a commit would have broken a state invariant. The server
    /// shuts down; recovery is by operator replay of the event log.
    pub invariant_failed: std::sync::atomic::AtomicBool,
}

impl HubState {
    /// Open the store, rebuild the projection, and stamp the schema version
    /// on first boot.
    pub fn open(config: HubConfig, shutdown: CancellationToken) -> anyhow::Result<Arc<Self>> {
        let mut store = EventStore::open(config.state_dir.as_deref())?;

        if store.last_id() == 0 {
            store
                .append(ProposedEvent::new(
                    aggregate::SCHEMA,
                    "log",
                    DomainEvent::SchemaMigrated { version: SCHEMA_VERSION },
                ))
                .map_err(|(code, msg)| anyhow::anyhow!("schema stamp failed: {code}: {msg}"))?;
        }

        let projection = Projection::rebuild(store.all());
        tracing::info!(
            events = store.last_id(),
            schema = projection.schema_version,
            "event store opened"
        );

        let state = Self {
            config,
            core: RwLock::new(Core { store, projection }),
            bus: EventBus::new(),
            shutdown,
            invariant_failed: std::sync::atomic::AtomicBool::new(false),
        };
        Ok(Arc::new(state))
    }

    /// Run a check-then-commit transaction under the write lock.
    ///
    /// The closure inspects (and may update the volatile parts of) the core,
    /// then returns the events to commit plus a result value. Events are
    /// appended and projected atomically; nothing is published if the
    /// closure fails.
    ///
    /// A version conflict is retried once against the re-read version; a
    /// second conflict surfaces to the caller.
    pub async fn transact<R>(
        &self,
        f: impl FnOnce(&mut Core) -> HubResult<(Vec<ProposedEvent>, R)>,
    ) -> HubResult<(Vec<EventRecord>, R)> {
        let mut core = self.core.write().await;
        let (batch, out) = f(&mut core)?;

        if let Err(violation) = check_invariants(&core, &batch) {
            let log_path = core
                .store
                .log_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<in-memory>".to_owned());
            tracing::error!(%violation, %log_path, "state invariant violated, refusing write");
            self.invariant_failed.store(true, std::sync::atomic::Ordering::SeqCst);
            self.shutdown.cancel();
            return Err((HubError::InvariantViolated, violation));
        }

        let mut committed = Vec::with_capacity(batch.len());
        for proposed in batch {
            let record = match core.store.append(proposed.clone()) {
                Ok(record) => record,
                Err((HubError::Conflict, _)) if proposed.expected_version.is_some() => {
                    let current =
                        core.store.version(proposed.aggregate_type, &proposed.aggregate_id);
                    let retried = ProposedEvent { expected_version: Some(current), ..proposed };
                    core.store.append(retried)?
                }
                Err(e) => return Err(e),
            };
            core.projection.apply(&record);
            committed.push(record);
        }
        drop(core);

        for record in &committed {
            tracing::debug!(
                id = record.id,
                kind = record.event.kind(),
                aggregate = %record.aggregate_id,
                "event committed"
            );
            self.bus.publish(record);
        }
        Ok((committed, out))
    }

    /// Commit a batch of events with no pre-checks.
    pub async fn commit(&self, batch: Vec<ProposedEvent>) -> HubResult<Vec<EventRecord>> {
        let (records, ()) = self.transact(move |_| Ok((batch, ()))).await?;
        Ok(records)
    }

    /// Run a closure against a read snapshot of the projection.
    pub async fn read<R>(&self, f: impl FnOnce(&Projection) -> R) -> R {
        let core = self.core.read().await;
        f(&core.projection)
    }

    /// All committed records with `id > since_id` (stream catch-up).
    pub async fn events_since(&self, since_id: u64) -> Vec<EventRecord> {
        let core = self.core.read().await;
        core.store.since(since_id)
    }
}

/// Verify a proposed batch cannot break the committed-state invariants:
/// overlay addresses stay unique, hostnames stay unique. Handlers already
/// enforce these; this is the last line before the log.
fn check_invariants(core: &Core, batch: &[ProposedEvent]) -> Result<(), String> {
    for proposed in batch {
        match &proposed.event {
            DomainEvent::IpAllocated { address, .. } => {
                if core.projection.ip_allocated(*address) {
                    return Err(format!("overlay address {address} is already allocated"));
                }
            }
            DomainEvent::NodeRegistered { node } => {
                if core.projection.node_by_hostname(&node.hostname).is_some() {
                    return Err(format!("hostname {} is already registered", node.hostname));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
