//! Per-object detail lookups for the selection side-channel.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::ObjectId;

/// Default timeout for a detail request.
pub const DEFAULT_DETAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a detail lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetailError {
    /// The request could not be sent or timed out.
    #[error("detail request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("detail endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// The body was not a JSON object.
    #[error("invalid detail response: {0}")]
    Decode(String),
}

/// Enriched attributes for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetails {
    pub id: ObjectId,
    pub attributes: Map<String, Value>,
}

/// Outcome of a selection, broadcast to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailOutcome {
    /// Details were fetched.
    Loaded(ObjectDetails),
    /// The lookup failed; the message is suitable for a transient error panel.
    Failed(String),
}

/// A selection and its lookup outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub id: ObjectId,
    pub outcome: DetailOutcome,
}

/// Fetches enriched attributes for a selected object.
pub trait DetailLookup: Send + Sync + 'static {
    /// Fetch details for `id`.
    fn fetch<'a>(&'a self, id: &'a ObjectId) -> BoxFuture<'a, Result<ObjectDetails, DetailError>>;
}

/// Detail lookup over `GET {base}/details/{id}`.
pub struct HttpDetailLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetailLookup {
    /// Create a lookup against the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, DetailError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_DETAIL_TIMEOUT)
            .build()
            .map_err(|e| DetailError::Request(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a lookup sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL queried for an id. The id is percent-encoded as one path segment.
    pub fn url_for(&self, id: &ObjectId) -> Result<reqwest::Url, DetailError> {
        let invalid = |reason: String| {
            DetailError::Request(format!("invalid base URL {}: {}", self.base_url, reason))
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot hold a path".to_string()))?
            .pop_if_empty()
            .push("details")
            .push(id.as_str());
        Ok(url)
    }
}

impl DetailLookup for HttpDetailLookup {
    fn fetch<'a>(&'a self, id: &'a ObjectId) -> BoxFuture<'a, Result<ObjectDetails, DetailError>> {
        Box::pin(async move {
            let url = self.url_for(id)?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| DetailError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(DetailError::Status {
                    status: status.as_u16(),
                });
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| DetailError::Request(e.to_string()))?;
            parse_details(id, &body)
        })
    }
}

/// Parse a detail body. The payload must be a JSON object.
pub(crate) fn parse_details(id: &ObjectId, body: &[u8]) -> Result<ObjectDetails, DetailError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(attributes)) => Ok(ObjectDetails {
            id: id.clone(),
            attributes,
        }),
        Ok(other) => Err(DetailError::Decode(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(DetailError::Decode(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
