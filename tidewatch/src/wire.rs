//! JSON wire shapes shared by the push channels and the read endpoint.
//!
//! Every producer decodes into [`ObjectUpdate`] through this module, so the
//! id normalisation and finite-coordinate check are the same everywhere.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::store::{ObjectAnnotation, ObjectId, ObjectUpdate, ValidationError};

/// Result of decoding one inbound message.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Decoded {
    /// Valid position updates, in message order.
    pub updates: Vec<ObjectUpdate>,
    /// Label-only annotations.
    pub annotations: Vec<ObjectAnnotation>,
    /// Items dropped by validation.
    pub rejected: usize,
}

impl Decoded {
    /// A decode result that dropped `count` items.
    pub fn rejected(count: usize) -> Self {
        Self {
            rejected: count,
            ..Self::default()
        }
    }

    /// Whether anything needs to be forwarded to the store.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.annotations.is_empty()
    }

    /// Number of items that passed validation.
    pub fn accepted(&self) -> usize {
        self.updates.len() + self.annotations.len()
    }

    /// Record the result of decoding one item.
    pub(crate) fn push(&mut self, item: Result<ObjectUpdate, ValidationError>) {
        match item {
            Ok(update) => self.updates.push(update),
            Err(e) => {
                tracing::trace!(error = %e, "Dropped inbound item");
                self.rejected += 1;
            }
        }
    }
}

/// Position update in the common JSON shape.
///
/// Accepts the aliases seen across feeds: `course`/`cog`, `speed`/`sog`,
/// `label`/`name` and `id`/`mmsi`.
#[derive(Debug, Deserialize)]
struct WireUpdate {
    #[serde(default, alias = "mmsi")]
    id: Option<Value>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, alias = "cog", deserialize_with = "lenient_f64")]
    course: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    heading: Option<f64>,
    #[serde(default, alias = "sog", deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, alias = "name")]
    label: Option<String>,
}

/// Decode one item in the common shape.
pub fn decode_update(item: &Value) -> Result<ObjectUpdate, ValidationError> {
    let wire =
        WireUpdate::deserialize(item).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let id = match wire.id {
        Some(raw) => object_id_from_value(&raw)?,
        None => return Err(ValidationError::MissingField("id")),
    };
    let lon = wire.lon.ok_or(ValidationError::MissingField("lon"))?;
    let lat = wire.lat.ok_or(ValidationError::MissingField("lat"))?;

    build_update(id, lon, lat, wire.heading.or(wire.course), wire.speed, wire.label)
}

/// Assemble and validate an update from already-extracted fields.
pub(crate) fn build_update(
    id: ObjectId,
    lon: f64,
    lat: f64,
    heading: Option<f64>,
    speed: Option<f64>,
    label: Option<String>,
) -> Result<ObjectUpdate, ValidationError> {
    let update = ObjectUpdate {
        id,
        position: crate::coord::Position::new(lon, lat),
        heading: heading.filter(|h| h.is_finite()),
        speed: speed.filter(|s| s.is_finite()),
        label: clean_label(label),
    };
    update.validate()?;
    Ok(update)
}

/// Normalise a JSON id (string or integer) into an [`ObjectId`].
pub fn object_id_from_value(value: &Value) -> Result<ObjectId, ValidationError> {
    match value {
        Value::String(s) => ObjectId::new(s),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(ObjectId::from(v))
            } else if let Some(v) = n.as_i64() {
                ObjectId::new(v.to_string())
            } else {
                Err(ValidationError::Malformed(format!("non-integer id {}", n)))
            }
        }
        Value::Null => Err(ValidationError::MissingField("id")),
        other => Err(ValidationError::Malformed(format!("unsupported id {}", other))),
    }
}

/// Trim a label, mapping blank text to `None`.
pub(crate) fn clean_label(label: Option<String>) -> Option<String> {
    label.and_then(|l| {
        let trimmed = l.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Accept a number, a numeric string, or null.
///
/// Anything else decodes as `None`; a missing coordinate is then reported
/// by the caller as a missing field.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
