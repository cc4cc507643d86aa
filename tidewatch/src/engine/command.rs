//! Commands accepted by the engine reactor and the sender producers use.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::cull::Snapshot;
use crate::store::{ObjectAnnotation, ObjectId, ObjectUpdate, StoreStats, TrackedObject};
use crate::wire::Decoded;

/// Default depth of the reactor's command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// The engine has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tracking engine is not running")]
pub struct EngineClosed;

/// A request to the reactor task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Apply position updates in order.
    Upsert(Vec<ObjectUpdate>),
    /// Apply label annotations.
    Annotate(Vec<ObjectAnnotation>),
    /// Force a cull on the next tick.
    MarkDirty,
    /// Remove every object.
    Clear,
    /// Report store counters.
    Stats(oneshot::Sender<StoreStats>),
    /// Fetch one object.
    Lookup(ObjectId, oneshot::Sender<Option<TrackedObject>>),
    /// Cull and publish now, returning the snapshot.
    FlushNow(oneshot::Sender<Option<Arc<Snapshot>>>),
}

/// Cloneable producer side of the reactor queue.
///
/// Every producer (transport runners, backfill, poller, host) funnels its
/// mutations through one of these, which fixes the arrival order.
#[derive(Debug, Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<EngineCommand>,
}

impl IngestSender {
    /// Create a sender and the matching receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Send a raw command.
    pub async fn send(&self, command: EngineCommand) -> Result<(), EngineClosed> {
        self.tx.send(command).await.map_err(|_| EngineClosed)
    }

    /// Queue position updates.
    pub async fn upsert(&self, updates: Vec<ObjectUpdate>) -> Result<(), EngineClosed> {
        if updates.is_empty() {
            return Ok(());
        }
        self.send(EngineCommand::Upsert(updates)).await
    }

    /// Queue label annotations.
    pub async fn annotate(&self, annotations: Vec<ObjectAnnotation>) -> Result<(), EngineClosed> {
        if annotations.is_empty() {
            return Ok(());
        }
        self.send(EngineCommand::Annotate(annotations)).await
    }

    /// Queue everything a decoder produced, updates first.
    pub async fn ingest(&self, decoded: Decoded) -> Result<(), EngineClosed> {
        self.upsert(decoded.updates).await?;
        self.annotate(decoded.annotations).await
    }

    /// Ask for a cull on the next tick.
    pub async fn mark_dirty(&self) -> Result<(), EngineClosed> {
        self.send(EngineCommand::MarkDirty).await
    }

    /// Whether the reactor is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
