//! Decoder for the primary push channel.
//!
//! Payloads are either a single update or `{"positions": [...]}`, optionally
//! wrapped in an `{"event": ..., "data": ...}` envelope.

use serde_json::Value;

use crate::wire::{decode_update, Decoded};

/// Envelope event carrying one update.
pub const EVENT_POSITION: &str = "ais_position";

/// Envelope event carrying a batch.
pub const EVENT_POSITION_BATCH: &str = "ais_position_batch";

/// Decode one text frame from the primary channel.
pub fn decode_primary(raw: &str) -> Decoded {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::trace!(error = %e, "Primary frame is not JSON");
            return Decoded::rejected(1);
        }
    };

    let payload = match unwrap_envelope(value) {
        Some(payload) => payload,
        None => return Decoded::default(),
    };

    let mut decoded = Decoded::default();
    match payload.get("positions") {
        Some(Value::Array(items)) => {
            for item in items {
                decoded.push(decode_update(item));
            }
        }
        Some(_) => decoded.rejected += 1,
        None => decoded.push(decode_update(&payload)),
    }
    decoded
}

/// Strip an `{event, data}` envelope.
///
/// Returns `None` for envelopes of unrelated events, which are ignored
/// rather than counted as invalid.
fn unwrap_envelope(value: Value) -> Option<Value> {
    let is_envelope = value.get("event").is_some_and(Value::is_string) && value.get("data").is_some();
    if !is_envelope {
        return Some(value);
    }

    let event = value.get("event").and_then(Value::as_str).unwrap_or_default();
    if event != EVENT_POSITION && event != EVENT_POSITION_BATCH {
        tracing::trace!(event, "Ignoring unrelated primary event");
        return None;
    }

    match value {
        Value::Object(mut map) => map.remove("data"),
        _ => None,
    }
}
