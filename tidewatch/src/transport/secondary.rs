//! Decoder and subscription frame for the secondary (fallback) stream.
//!
//! The stream speaks a typed envelope:
//!
//! ```text
//! {"MessageType": "PositionReport",
//!  "MetaData": {"MMSI": 244660000, "ShipName": "ALBA  "},
//!  "Message": {"PositionReport": {"UserID": 244660000, "Latitude": 52.0,
//!                                 "Longitude": 4.1, "Cog": 91.5, "Sog": 12.0,
//!                                 "TrueHeading": 511}}}
//! ```
//!
//! Position reports become updates, static data becomes label annotations,
//! and every other message type is ignored.

use serde::{Deserialize, Serialize};

use super::TransportError;
use crate::coord::{Viewport, MERCATOR_MAX_LAT, MERCATOR_MIN_LAT};
use crate::store::{ObjectAnnotation, ObjectId, ValidationError};
use crate::wire::{build_update, clean_label, lenient_f64, Decoded};

/// Default secondary stream endpoint.
pub const DEFAULT_SECONDARY_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// Message types requested in the subscription.
pub const SUBSCRIBED_MESSAGE_TYPES: [&str; 2] = ["PositionReport", "ShipStaticData"];

/// `TrueHeading` value meaning "not available".
const HEADING_NOT_AVAILABLE: f64 = 511.0;

#[derive(Debug, Serialize)]
struct Subscription<'a> {
    #[serde(rename = "APIKey")]
    credential: &'a str,
    #[serde(rename = "BoundingBoxes")]
    bounding_boxes: Vec<[[f64; 2]; 2]>,
    #[serde(rename = "FilterMessageTypes")]
    message_types: [&'static str; 2],
}

/// Bounding box covering the whole mercator world.
pub fn world_bounding_boxes() -> Vec<[[f64; 2]; 2]> {
    vec![[[-180.0, MERCATOR_MIN_LAT], [180.0, MERCATOR_MAX_LAT]]]
}

/// Subscription frame sent right after connecting.
pub fn subscription_message(
    credential: &str,
    bounding_boxes: Vec<[[f64; 2]; 2]>,
) -> Result<String, TransportError> {
    let subscription = Subscription {
        credential,
        bounding_boxes,
        message_types: SUBSCRIBED_MESSAGE_TYPES,
    };
    serde_json::to_string(&subscription).map_err(|e| TransportError::Encode(e.to_string()))
}

/// Subscription frame scoped to a viewport.
pub fn subscription_for_viewport(
    credential: &str,
    viewport: &Viewport,
) -> Result<String, TransportError> {
    subscription_message(credential, viewport.bounding_boxes())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "MessageType")]
enum StreamMessage {
    PositionReport {
        #[serde(rename = "Message")]
        message: PositionReportBody,
        #[serde(rename = "MetaData", default)]
        meta: MetaData,
    },
    ShipStaticData {
        #[serde(rename = "Message")]
        message: StaticDataBody,
        #[serde(rename = "MetaData", default)]
        meta: MetaData,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MetaData {
    #[serde(rename = "MMSI", default)]
    mmsi: Option<u64>,
    #[serde(rename = "ShipName", default)]
    ship_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PositionReportBody {
    #[serde(rename = "PositionReport")]
    report: PositionReport,
}

#[derive(Debug, Deserialize)]
struct PositionReport {
    #[serde(rename = "UserID", default)]
    user_id: Option<u64>,
    #[serde(rename = "Latitude", default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(rename = "Cog", default, deserialize_with = "lenient_f64")]
    cog: Option<f64>,
    #[serde(rename = "Sog", default, deserialize_with = "lenient_f64")]
    sog: Option<f64>,
    #[serde(rename = "TrueHeading", default, deserialize_with = "lenient_f64")]
    true_heading: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StaticDataBody {
    #[serde(rename = "ShipStaticData")]
    data: ShipStaticData,
}

#[derive(Debug, Deserialize)]
struct ShipStaticData {
    #[serde(rename = "UserID", default)]
    user_id: Option<u64>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
}

/// Decode one text frame from the secondary channel.
pub fn decode_secondary(raw: &str) -> Decoded {
    let message: StreamMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::trace!(error = %e, "Secondary frame not understood");
            return Decoded::rejected(1);
        }
    };

    let mut decoded = Decoded::default();
    match message {
        StreamMessage::PositionReport { message, meta } => {
            decoded.push(position_update(message.report, meta));
        }
        StreamMessage::ShipStaticData { message, meta } => {
            match static_annotation(message.data, meta) {
                Ok(Some(annotation)) => decoded.annotations.push(annotation),
                Ok(None) => {}
                Err(e) => {
                    tracing::trace!(error = %e, "Dropped static data");
                    decoded.rejected += 1;
                }
            }
        }
        StreamMessage::Other => {}
    }
    decoded
}

fn position_update(
    report: PositionReport,
    meta: MetaData,
) -> Result<crate::store::ObjectUpdate, ValidationError> {
    let id = report
        .user_id
        .or(meta.mmsi)
        .map(ObjectId::from)
        .ok_or(ValidationError::MissingField("UserID"))?;
    let lon = report
        .longitude
        .or(meta.longitude)
        .ok_or(ValidationError::MissingField("Longitude"))?;
    let lat = report
        .latitude
        .or(meta.latitude)
        .ok_or(ValidationError::MissingField("Latitude"))?;

    let heading = report
        .true_heading
        .filter(|h| *h != HEADING_NOT_AVAILABLE)
        .or(report.cog);

    build_update(id, lon, lat, heading, report.sog, meta.ship_name)
}

fn static_annotation(
    data: ShipStaticData,
    meta: MetaData,
) -> Result<Option<ObjectAnnotation>, ValidationError> {
    let id = data
        .user_id
        .or(meta.mmsi)
        .map(ObjectId::from)
        .ok_or(ValidationError::MissingField("UserID"))?;
    Ok(clean_label(data.name.or(meta.ship_name)).map(|label| ObjectAnnotation { id, label }))
}
