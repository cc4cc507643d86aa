//! Render bridge: hands snapshots to an external drawing surface.
//!
//! The engine never waits on the renderer. [`RenderBridge::publish`] drops the
//! snapshot into a latest-value `watch` slot and returns; a delivery task
//! forwards whatever is newest to [`RenderSurface::replace_point_set`]. A slow
//! surface therefore skips intermediate snapshots rather than receiving them
//! late, and only ever sees complete, immutable snapshots.
//!
//! ```text
//! Reactor ──publish──► watch slot ──► delivery task ──► RenderSurface
//!                                           │
//!                                  failure: retry flag ──► next tick
//! ```
//!
//! User selection flows the other way: `select`/`select_at` spawn a
//! [`DetailLookup`] and broadcast the outcome to the host.

mod detail;

pub use detail::{
    DetailError, DetailLookup, DetailOutcome, HttpDetailLookup, ObjectDetails, SelectionEvent,
    DEFAULT_DETAIL_TIMEOUT,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coord::Viewport;
use crate::cull::Snapshot;
use crate::store::ObjectId;

/// Capacity of the selection broadcast channel.
const SELECTION_CHANNEL_CAPACITY: usize = 16;

/// Errors at the rendering boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderBridgeError {
    /// The surface is not ready to accept a point set.
    #[error("rendering surface is not ready")]
    Unavailable,

    /// The surface refused the point set.
    #[error("rendering surface rejected the point set: {0}")]
    Rejected(String),
}

/// The external drawing engine.
///
/// Implementations are imperative wrappers around a map widget or similar.
pub trait RenderSurface: Send + Sync + 'static {
    /// Whether the surface can accept a point set right now.
    fn is_ready(&self) -> bool;

    /// Replace the whole displayed point set.
    fn replace_point_set<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> BoxFuture<'a, Result<(), RenderBridgeError>>;

    /// The bounds currently displayed, if known.
    fn current_bounds(&self) -> Option<Viewport>;

    /// The object under a screen point, if any.
    fn hit_test(&self, x: f64, y: f64) -> Option<ObjectId>;
}

/// Glue between the engine and a [`RenderSurface`].
pub struct RenderBridge {
    surface: Arc<dyn RenderSurface>,
    latest: watch::Sender<Option<Arc<Snapshot>>>,
    retry: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    detail: Option<Arc<dyn DetailLookup>>,
    selections: broadcast::Sender<SelectionEvent>,
}

impl RenderBridge {
    /// Create a bridge over a surface, with an optional detail lookup.
    pub fn new(surface: Arc<dyn RenderSurface>, detail: Option<Arc<dyn DetailLookup>>) -> Self {
        let (latest, _) = watch::channel(None);
        let (selections, _) = broadcast::channel(SELECTION_CHANNEL_CAPACITY);
        Self {
            surface,
            latest,
            retry: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            detail,
            selections,
        }
    }

    /// Spawn the task that forwards published snapshots to the surface.
    pub fn spawn_delivery(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut latest = self.latest.subscribe();
        let surface = Arc::clone(&self.surface);
        let retry = Arc::clone(&self.retry);
        let delivered = Arc::clone(&self.delivered);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = latest.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = latest.borrow_and_update().clone();
                        let Some(snapshot) = snapshot else {
                            continue;
                        };
                        match surface.replace_point_set(&snapshot).await {
                            Ok(()) => {
                                delivered.store(snapshot.generation, Ordering::Release);
                                debug!(
                                    generation = snapshot.generation,
                                    points = snapshot.len(),
                                    "Point set delivered"
                                );
                            }
                            Err(e) => {
                                warn!(
                                    generation = snapshot.generation,
                                    error = %e,
                                    "Point set replacement failed, retrying next tick"
                                );
                                retry.store(true, Ordering::Release);
                            }
                        }
                    }
                }
            }
            debug!("Render delivery stopped");
        })
    }

    /// Whether the surface can accept a point set.
    pub fn is_ready(&self) -> bool {
        self.surface.is_ready()
    }

    /// Queue a snapshot for delivery.
    ///
    /// Returns [`RenderBridgeError::Unavailable`] without queueing anything
    /// when the surface is not ready, so the caller keeps its dirty state.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> Result<(), RenderBridgeError> {
        if !self.surface.is_ready() {
            return Err(RenderBridgeError::Unavailable);
        }
        self.latest.send_replace(Some(snapshot));
        Ok(())
    }

    /// Consume the retry flag raised by a failed delivery.
    pub fn take_retry(&self) -> bool {
        self.retry.swap(false, Ordering::AcqRel)
    }

    /// Generation of the last snapshot the surface accepted (0 if none).
    pub fn delivered_generation(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.borrow().clone()
    }

    /// Bounds the surface currently displays.
    pub fn current_bounds(&self) -> Option<Viewport> {
        self.surface.current_bounds()
    }

    /// Subscribe to selection outcomes.
    pub fn subscribe_selection(&self) -> broadcast::Receiver<SelectionEvent> {
        self.selections.subscribe()
    }

    /// Start a detail lookup for `id`.
    ///
    /// Returns `false` when no lookup is configured. Must be called from
    /// within a Tokio runtime.
    pub fn select(&self, id: ObjectId) -> bool {
        let Some(lookup) = self.detail.clone() else {
            debug!(id = %id, "Selection ignored, no detail lookup configured");
            return false;
        };
        let selections = self.selections.clone();

        tokio::spawn(async move {
            let outcome = match lookup.fetch(&id).await {
                Ok(details) => DetailOutcome::Loaded(details),
                Err(e) => {
                    warn!(id = %id, error = %e, "Detail lookup failed");
                    DetailOutcome::Failed(e.to_string())
                }
            };
            // No subscribers is fine; the host may not show a panel.
            let _ = selections.send(SelectionEvent { id, outcome });
        });
        true
    }

    /// Hit-test a screen point and select whatever is there.
    pub fn select_at(&self, x: f64, y: f64) -> Option<ObjectId> {
        let id = self.surface.hit_test(x, y)?;
        self.select(id.clone());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cull::ViewportCuller;
    use crate::store::{FeatureStore, ObjectUpdate};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockSurface {
        not_ready: AtomicBool,
        fail: AtomicBool,
        received: Mutex<Vec<u64>>,
    }

    impl RenderSurface for MockSurface {
        fn is_ready(&self) -> bool {
            !self.not_ready.load(Ordering::SeqCst)
        }

        fn replace_point_set<'a>(
            &'a self,
            snapshot: &'a Snapshot,
        ) -> BoxFuture<'a, Result<(), RenderBridgeError>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(RenderBridgeError::Rejected("boom".into()));
                }
                self.received.lock().push(snapshot.generation);
                Ok(())
            })
        }

        fn current_bounds(&self) -> Option<Viewport> {
            Some(Viewport::world())
        }

        fn hit_test(&self, x: f64, _y: f64) -> Option<ObjectId> {
            (x > 0.0).then(|| ObjectId::new("hit").unwrap())
        }
    }

    struct MockLookup;

    impl DetailLookup for MockLookup {
        fn fetch<'a>(
            &'a self,
            id: &'a ObjectId,
        ) -> BoxFuture<'a, Result<ObjectDetails, DetailError>> {
            Box::pin(async move {
                if id.as_str() == "missing" {
                    return Err(DetailError::Status { status: 404 });
                }
                Ok(ObjectDetails {
                    id: id.clone(),
                    attributes: serde_json::Map::new(),
                })
            })
        }
    }

    fn snapshot() -> Arc<Snapshot> {
        let mut store = FeatureStore::new();
        store.upsert(ObjectUpdate::new(ObjectId::new("a").unwrap(), 1.0, 1.0));
        ViewportCuller::new(10).cull(store.snapshot_all(), &Viewport::world())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_publish_delivers_snapshot() {
        let surface = Arc::new(MockSurface::default());
        let bridge = RenderBridge::new(surface.clone(), None);
        let shutdown = CancellationToken::new();
        let task = bridge.spawn_delivery(shutdown.clone());

        bridge.publish(snapshot()).unwrap();
        settle().await;

        assert_eq!(*surface.received.lock(), vec![1]);
        assert_eq!(bridge.delivered_generation(), 1);
        assert!(!bridge.take_retry());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_when_not_ready() {
        let surface = Arc::new(MockSurface::default());
        surface.not_ready.store(true, Ordering::SeqCst);
        let bridge = RenderBridge::new(surface.clone(), None);

        assert_eq!(
            bridge.publish(snapshot()),
            Err(RenderBridgeError::Unavailable)
        );
        assert!(bridge.latest().is_none());
    }

    #[tokio::test]
    async fn test_failed_delivery_raises_retry() {
        let surface = Arc::new(MockSurface::default());
        surface.fail.store(true, Ordering::SeqCst);
        let bridge = RenderBridge::new(surface.clone(), None);
        let shutdown = CancellationToken::new();
        let _task = bridge.spawn_delivery(shutdown.clone());

        bridge.publish(snapshot()).unwrap();
        settle().await;

        assert!(bridge.take_retry());
        assert!(!bridge.take_retry(), "retry flag is consumed");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_select_broadcasts_outcome() {
        let surface = Arc::new(MockSurface::default());
        let bridge = RenderBridge::new(surface, Some(Arc::new(MockLookup)));
        let mut events = bridge.subscribe_selection();

        assert!(bridge.select(ObjectId::new("missing").unwrap()));
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event.outcome,
            DetailOutcome::Failed("detail endpoint returned HTTP 404".into())
        );

        assert_eq!(bridge.select_at(5.0, 5.0), Some(ObjectId::new("hit").unwrap()));
        let event = events.recv().await.unwrap();
        assert!(matches!(event.outcome, DetailOutcome::Loaded(_)));

        assert_eq!(bridge.select_at(-1.0, 0.0), None);
    }

    #[tokio::test]
    async fn test_select_without_lookup() {
        let bridge = RenderBridge::new(Arc::new(MockSurface::default()), None);
        assert!(!bridge.select(ObjectId::new("a").unwrap()));
    }
}
