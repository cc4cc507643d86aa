//! Rendering surface that writes snapshots to the log.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use tidewatch::coord::Viewport;
use tidewatch::cull::Snapshot;
use tidewatch::render::{RenderBridgeError, RenderSurface};
use tidewatch::store::ObjectId;
use tracing::debug;

/// Headless stand-in for a map widget.
///
/// Always ready, reports the configured view as its bounds and has nothing
/// to click on.
pub struct LogSurface {
    bounds: Viewport,
    replaced: AtomicU64,
}

impl LogSurface {
    pub fn new(bounds: Viewport) -> Self {
        Self {
            bounds,
            replaced: AtomicU64::new(0),
        }
    }

    /// Number of point sets received.
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

impl RenderSurface for LogSurface {
    fn is_ready(&self) -> bool {
        true
    }

    fn replace_point_set<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> BoxFuture<'a, Result<(), RenderBridgeError>> {
        Box::pin(async move {
            self.replaced.fetch_add(1, Ordering::Relaxed);
            debug!(
                generation = snapshot.generation,
                points = snapshot.len(),
                visible = snapshot.visible_count,
                sampled = snapshot.is_sampled(),
                "Point set replaced"
            );
            Ok(())
        })
    }

    fn current_bounds(&self) -> Option<Viewport> {
        Some(self.bounds)
    }

    fn hit_test(&self, _x: f64, _y: f64) -> Option<ObjectId> {
        None
    }
}
