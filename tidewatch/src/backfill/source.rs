//! Paginated read endpoint.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use super::BackfillError;
use crate::coord::Viewport;
use crate::wire::{decode_update, Decoded};

/// Path of the paginated positions endpoint below the API base.
pub const POSITIONS_PATH: &str = "/api/ais/positions";

/// Default HTTP timeout for one page.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(15);

/// One page request, scoped to a viewport. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    pub viewport: Viewport,
}

impl PageRequest {
    /// Query parameters in wire order.
    pub fn query(&self) -> [(&'static str, String); 6] {
        [
            ("page", self.page.to_string()),
            ("page_size", self.page_size.to_string()),
            ("west", self.viewport.west.to_string()),
            ("south", self.viewport.south.to_string()),
            ("east", self.viewport.east.to_string()),
            ("north", self.viewport.north.to_string()),
        ]
    }
}

/// A page of results.
///
/// Items stay raw until [`PageResponse::decode`], so one malformed item does
/// not spoil the page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub items: Vec<Value>,
}

impl PageResponse {
    /// Build a response from raw items.
    pub fn from_items(page: u32, items: Vec<Value>) -> Self {
        Self {
            total: items.len() as u64,
            page,
            page_size: items.len() as u32,
            items,
        }
    }

    /// Validate and convert every item.
    pub fn decode(&self) -> Decoded {
        let mut decoded = Decoded::default();
        for item in &self.items {
            decoded.push(decode_update(item));
        }
        decoded
    }
}

/// Anything that can serve viewport-scoped pages.
pub trait PageSource: Send + Sync + 'static {
    /// Fetch one page.
    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, Result<PageResponse, BackfillError>>;
}

/// `GET {api_base}/api/ais/positions` over HTTP.
pub struct HttpPageSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPageSource {
    /// Create a source for the given API base URL.
    pub fn new(api_base: &str) -> Result<Self, BackfillError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PAGE_TIMEOUT)
            .build()
            .map_err(|e| BackfillError::Request(e.to_string()))?;
        Ok(Self::with_client(client, api_base))
    }

    /// Create a source sharing an existing client.
    pub fn with_client(client: reqwest::Client, api_base: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}{}", api_base.trim_end_matches('/'), POSITIONS_PATH),
        }
    }

    /// The endpoint URL without query.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PageSource for HttpPageSource {
    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, Result<PageResponse, BackfillError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.endpoint)
                .query(&request.query())
                .send()
                .await
                .map_err(|e| BackfillError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BackfillError::Status {
                    status: status.as_u16(),
                    page: request.page,
                });
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| BackfillError::Request(e.to_string()))?;
            serde_json::from_slice(&body).map_err(|e| BackfillError::Decode(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_parameters() {
        let request = PageRequest {
            page: 2,
            page_size: 500,
            viewport: Viewport::new(-10.0, 35.0, 5.5, 45.0, 5.0),
        };
        let query = request.query();
        assert_eq!(query[0], ("page", "2".to_string()));
        assert_eq!(query[1], ("page_size", "500".to_string()));
        assert_eq!(query[2], ("west", "-10".to_string()));
        assert_eq!(query[4], ("east", "5.5".to_string()));
    }

    #[test]
    fn test_endpoint_join() {
        let source = HttpPageSource::with_client(reqwest::Client::new(), "http://localhost:8000/");
        assert_eq!(source.endpoint(), "http://localhost:8000/api/ais/positions");
    }

    #[test]
    fn test_response_parse_and_decode() {
        let response: PageResponse = serde_json::from_value(json!({
            "total": 3, "page": 1, "page_size": 3,
            "items": [
                {"id": "1", "lat": 40.0, "lon": -3.0},
                {"id": "2", "lat": "bad", "lon": -3.0},
                {"id": 3, "lat": 41.0, "lon": -4.0}
            ]
        }))
        .unwrap();

        let decoded = response.decode();
        assert_eq!(decoded.updates.len(), 2);
        assert_eq!(decoded.rejected, 1);
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let response: PageResponse = serde_json::from_str("{}").unwrap();
        assert!(response.items.is_empty());
    }
}
