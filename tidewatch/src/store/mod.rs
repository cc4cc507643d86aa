//! Feature store: the authoritative map of tracked objects.
//!
//! The store holds exactly one [`TrackedObject`] per [`ObjectId`]. It is a
//! plain single-owner structure; the engine's reactor task owns it and every
//! mutation flows through that task in arrival order.
//!
//! A `dirty` flag records that something changed since the last published
//! snapshot. Only the culler clears it, and only after a successful publish.

mod model;

pub use model::{ObjectAnnotation, ObjectId, ObjectUpdate, TrackedObject, ValidationError};

use std::collections::HashMap;
use std::time::Instant;

use tracing::trace;

/// Result of applying one update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// A new entry was inserted.
    Created,
    /// An existing entry had at least one attribute changed.
    Updated,
    /// The update matched the stored record exactly.
    Unchanged,
    /// The update failed validation and was dropped.
    Rejected(ValidationError),
}

impl UpsertOutcome {
    /// Whether the store content changed.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// Counters describing the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of tracked objects.
    pub objects: usize,
    /// Updates refused by validation since the store was created.
    pub rejected: u64,
    /// Annotations ignored because their object was unknown.
    pub orphan_annotations: u64,
    /// Whether a cull is pending.
    pub dirty: bool,
}

/// The authoritative set of tracked objects.
#[derive(Debug, Default)]
pub struct FeatureStore {
    objects: HashMap<ObjectId, TrackedObject>,
    dirty: bool,
    rejected: u64,
    orphan_annotations: u64,
}

impl FeatureStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with room for `capacity` objects.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            objects: HashMap::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Insert or merge an update.
    ///
    /// Invalid updates are counted and dropped without touching the store.
    pub fn upsert(&mut self, update: ObjectUpdate) -> UpsertOutcome {
        if let Err(e) = update.validate() {
            self.rejected += 1;
            trace!(id = %update.id, error = %e, "Update rejected");
            return UpsertOutcome::Rejected(e);
        }
        let update = update.without_non_finite();

        let now = Instant::now();
        let outcome = match self.objects.get_mut(&update.id) {
            Some(existing) => {
                if existing.merge(update, now) {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            None => {
                let object = TrackedObject::from_update(update, now);
                self.objects.insert(object.id.clone(), object);
                UpsertOutcome::Created
            }
        };

        self.dirty = true;
        outcome
    }

    /// Apply a label annotation to an existing entry.
    ///
    /// Returns `true` if the label changed. Unknown ids are ignored.
    pub fn annotate(&mut self, annotation: ObjectAnnotation) -> bool {
        let label = annotation.label.trim();
        if label.is_empty() {
            return false;
        }
        match self.objects.get_mut(&annotation.id) {
            Some(object) if object.label.as_deref() != Some(label) => {
                object.label = Some(label.to_string());
                object.changed_at = Instant::now();
                self.dirty = true;
                true
            }
            Some(_) => false,
            None => {
                self.orphan_annotations += 1;
                false
            }
        }
    }

    /// Look up a single object.
    pub fn get(&self, id: &ObjectId) -> Option<&TrackedObject> {
        self.objects.get(id)
    }

    /// Read-only view of every stored object.
    pub fn snapshot_all(&self) -> StoreView<'_> {
        StoreView {
            objects: &self.objects,
        }
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether a cull is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Request a cull even if nothing changed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the pending-cull flag after a successful publish.
    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Number of updates refused by validation.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Remove every object. Only the host asks for this.
    pub fn clear(&mut self) {
        if !self.objects.is_empty() {
            self.objects.clear();
            self.dirty = true;
        }
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            objects: self.objects.len(),
            rejected: self.rejected,
            orphan_annotations: self.orphan_annotations,
            dirty: self.dirty,
        }
    }
}

/// Borrowed read-only view over the store contents.
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    objects: &'a HashMap<ObjectId, TrackedObject>,
}

impl<'a> StoreView<'a> {
    /// Iterate over every object in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &'a TrackedObject> + 'a {
        self.objects.values()
    }

    /// Number of objects in the view.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
