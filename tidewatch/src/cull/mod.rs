//! Viewport culling and stable sampling.
//!
//! The culler turns the store into a bounded [`Snapshot`] for one publish
//! cycle:
//!
//! 1. Keep objects whose position is inside the viewport (antimeridian aware).
//! 2. If more than `budget` are visible, keep those whose id hash is a
//!    multiple of `stride = ceil(visible / budget)`.
//! 3. If hash buckets were uneven and the result is still over budget, order
//!    by `(hash, id)` and truncate.
//!
//! Every step depends only on the ids and the viewport, so an unchanged
//! visible set always yields the identical subset and markers do not flicker
//! between flushes.

use std::sync::Arc;
use std::time::Duration;

use crate::coord::Viewport;
use crate::store::{ObjectId, StoreView, TrackedObject};

/// Default maximum number of objects per snapshot.
pub const DEFAULT_RENDER_BUDGET: usize = 2000;

/// Default flush cadence.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Stable 32-bit FNV-1a hash of an id's text.
pub fn stable_hash(id: &str) -> u32 {
    id.as_bytes().iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Sampling stride for a visible count under a budget.
pub fn sample_stride(visible: usize, budget: usize) -> usize {
    let budget = budget.max(1);
    if visible <= budget {
        1
    } else {
        visible.div_ceil(budget)
    }
}

/// Culling configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CullConfig {
    /// Maximum objects per snapshot (at least 1).
    pub budget: usize,
    /// How often the engine checks the dirty flag.
    pub flush_interval: Duration,
}

impl Default for CullConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_RENDER_BUDGET,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl CullConfig {
    /// Set the render budget. Values below 1 are raised to 1.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget.max(1);
        self
    }

    /// Set the flush cadence.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// The bounded, immutable result of one cull.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Monotonic publish counter.
    pub generation: u64,
    /// The viewport this snapshot was culled against.
    pub viewport: Viewport,
    /// Number of objects inside the viewport before sampling.
    pub visible_count: usize,
    /// Stride applied (1 when no sampling was needed).
    pub stride: usize,
    objects: Vec<TrackedObject>,
}

impl Snapshot {
    /// The selected objects, ordered by id.
    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    /// Number of selected objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Look up a selected object by id.
    pub fn get(&self, id: &ObjectId) -> Option<&TrackedObject> {
        self.objects
            .binary_search_by(|o| o.id.cmp(id))
            .ok()
            .map(|i| &self.objects[i])
    }

    /// Whether sampling dropped any visible objects.
    pub fn is_sampled(&self) -> bool {
        self.objects.len() < self.visible_count
    }
}

/// Produces snapshots from the store.
#[derive(Debug)]
pub struct ViewportCuller {
    budget: usize,
    generation: u64,
}

impl ViewportCuller {
    /// Create a culler with the given budget (clamped to at least 1).
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            generation: 0,
        }
    }

    /// The active budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Generation of the most recent snapshot (0 before the first cull).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run one cull over the store.
    pub fn cull(&mut self, view: StoreView<'_>, viewport: &Viewport) -> Arc<Snapshot> {
        let visible: Vec<&TrackedObject> = view
            .iter()
            .filter(|object| viewport.contains(object.position))
            .collect();
        let visible_count = visible.len();
        let stride = sample_stride(visible_count, self.budget);

        let mut kept: Vec<(u32, &TrackedObject)> = visible
            .into_iter()
            .map(|object| (stable_hash(object.id.as_str()), object))
            .filter(|(hash, _)| stride == 1 || (*hash as usize) % stride == 0)
            .collect();

        if kept.len() > self.budget {
            kept.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
            kept.truncate(self.budget);
        }

        let mut objects: Vec<TrackedObject> =
            kept.into_iter().map(|(_, object)| object.clone()).collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));

        self.generation += 1;
        Arc::new(Snapshot {
            generation: self.generation,
            viewport: *viewport,
            visible_count,
            stride,
            objects,
        })
    }
}
