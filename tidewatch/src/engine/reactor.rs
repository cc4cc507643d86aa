//! The task that owns the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::EngineCommand;
use crate::coord::Viewport;
use crate::cull::{Snapshot, ViewportCuller};
use crate::render::{RenderBridge, RenderBridgeError};
use crate::store::{FeatureStore, UpsertOutcome};

/// Applies commands in arrival order and runs the flush cadence.
pub(crate) struct Reactor {
    store: FeatureStore,
    culler: ViewportCuller,
    bridge: Arc<RenderBridge>,
    viewport: watch::Receiver<Viewport>,
    commands: mpsc::Receiver<EngineCommand>,
    flush_interval: Duration,
}

impl Reactor {
    pub(crate) fn new(
        culler: ViewportCuller,
        bridge: Arc<RenderBridge>,
        viewport: watch::Receiver<Viewport>,
        commands: mpsc::Receiver<EngineCommand>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store: FeatureStore::new(),
            culler,
            bridge,
            viewport,
            commands,
            flush_interval,
        }
    }

    /// Run until `shutdown` fires or every sender is gone.
    ///
    /// The store is handed back intact.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> FeatureStore {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            budget = self.culler.budget(),
            flush_ms = self.flush_interval.as_millis() as u64,
            "Engine reactor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => {
                    self.flush_if_dirty();
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        info!(objects = self.store.len(), "Engine reactor stopped");
        self.store
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Upsert(updates) => {
                let mut created = 0usize;
                let mut rejected = 0usize;
                for update in updates {
                    match self.store.upsert(update) {
                        UpsertOutcome::Created => created += 1,
                        UpsertOutcome::Rejected(_) => rejected += 1,
                        UpsertOutcome::Updated | UpsertOutcome::Unchanged => {}
                    }
                }
                trace!(created, rejected, total = self.store.len(), "Batch applied");
            }
            EngineCommand::Annotate(annotations) => {
                for annotation in annotations {
                    self.store.annotate(annotation);
                }
            }
            EngineCommand::MarkDirty => self.store.mark_dirty(),
            EngineCommand::Clear => {
                let removed = self.store.len();
                self.store.clear();
                info!(removed, "Store cleared");
            }
            EngineCommand::Stats(reply) => {
                let _ = reply.send(self.store.stats());
            }
            EngineCommand::Lookup(id, reply) => {
                let _ = reply.send(self.store.get(&id).cloned());
            }
            EngineCommand::FlushNow(reply) => {
                let _ = reply.send(self.publish());
            }
        }
    }

    /// One cadence tick: publish only if something changed.
    fn flush_if_dirty(&mut self) {
        if self.bridge.take_retry() {
            self.store.mark_dirty();
        }
        if !self.store.is_dirty() {
            return;
        }
        self.publish();
    }

    /// Cull against the live viewport and hand the result to the bridge.
    ///
    /// The dirty flag is cleared only once the bridge accepted the snapshot.
    fn publish(&mut self) -> Option<Arc<Snapshot>> {
        if !self.bridge.is_ready() {
            debug!("Surface not ready, flush deferred");
            return None;
        }

        let viewport = *self.viewport.borrow();
        let snapshot = self.culler.cull(self.store.snapshot_all(), &viewport);
        match self.bridge.publish(Arc::clone(&snapshot)) {
            Ok(()) => {
                self.store.clear_dirty();
                debug!(
                    generation = snapshot.generation,
                    visible = snapshot.visible_count,
                    published = snapshot.len(),
                    stride = snapshot.stride,
                    "Snapshot published"
                );
                Some(snapshot)
            }
            Err(RenderBridgeError::Unavailable) => {
                debug!("Surface became unavailable, flush deferred");
                None
            }
            Err(e) => {
                warn!(error = %e, "Snapshot publish failed");
                None
            }
        }
    }
}
