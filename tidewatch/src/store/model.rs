//! Data model for tracked objects.

use std::fmt;
use std::time::Instant;

use thiserror::Error;

use crate::coord::Position;

/// Why an incoming update or payload was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The identifier was empty after trimming.
    #[error("object id is empty")]
    EmptyId,

    /// A required field was absent from the payload.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Longitude or latitude is NaN or infinite.
    #[error("non-finite position ({lon}, {lat})")]
    NonFinitePosition { lon: f64, lat: f64 },

    /// The payload could not be parsed into the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Identity of a tracked object (an MMSI for vessels).
///
/// Identifiers are compared as trimmed strings; numeric ids from the wire
/// are rendered in decimal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    /// Create an id from raw text, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One incoming position report.
///
/// Optional fields that are `None` leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdate {
    pub id: ObjectId,
    pub position: Position,
    /// Heading in degrees.
    pub heading: Option<f64>,
    /// Speed over ground in knots.
    pub speed: Option<f64>,
    /// Human-readable label (vessel name).
    pub label: Option<String>,
}

impl ObjectUpdate {
    /// Create an update carrying only a position.
    pub fn new(id: ObjectId, lon: f64, lat: f64) -> Self {
        Self {
            id,
            position: Position::new(lon, lat),
            heading: None,
            speed: None,
            label: None,
        }
    }

    /// Set the heading.
    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Set the speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Drop non-finite optional values, which count as unknown.
    pub fn without_non_finite(mut self) -> Self {
        self.heading = self.heading.filter(|h| h.is_finite());
        self.speed = self.speed.filter(|s| s.is_finite());
        self
    }

    /// Check that the update may enter the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.position.is_finite() {
            return Err(ValidationError::NonFinitePosition {
                lon: self.position.lon,
                lat: self.position.lat,
            });
        }
        Ok(())
    }
}

/// Static data about an object (e.g. its name) without a position.
///
/// Annotations only ever amend existing entries; they never create one.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAnnotation {
    pub id: ObjectId,
    pub label: String,
}

/// The stored record for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub position: Position,
    /// Heading in degrees, 0 until a report carries one.
    pub heading: f64,
    pub speed: Option<f64>,
    pub label: Option<String>,
    /// When the record last changed.
    pub changed_at: Instant,
}

impl TrackedObject {
    /// Build a fresh record from its first update.
    pub(crate) fn from_update(update: ObjectUpdate, now: Instant) -> Self {
        Self {
            id: update.id,
            position: update.position,
            heading: update.heading.unwrap_or(0.0),
            speed: update.speed,
            label: update.label,
            changed_at: now,
        }
    }

    /// Merge an update into this record.
    ///
    /// Returns `true` if any attribute changed.
    pub(crate) fn merge(&mut self, update: ObjectUpdate, now: Instant) -> bool {
        let mut changed = false;

        if self.position != update.position {
            self.position = update.position;
            changed = true;
        }
        if let Some(heading) = update.heading {
            if self.heading != heading {
                self.heading = heading;
                changed = true;
            }
        }
        if let Some(speed) = update.speed {
            if self.speed != Some(speed) {
                self.speed = Some(speed);
                changed = true;
            }
        }
        if let Some(label) = update.label {
            if self.label.as_deref() != Some(label.as_str()) {
                self.label = Some(label);
                changed = true;
            }
        }

        if changed {
            self.changed_at = now;
        }
        changed
    }
}
