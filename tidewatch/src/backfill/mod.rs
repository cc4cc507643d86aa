//! One-shot paginated bulk load for a viewport.
//!
//! The loader walks pages `1, 2, ...` scoped to the viewport it was started
//! for, feeding each page into the engine. A session is tied to the
//! viewport's fingerprint: the live viewport is compared before every request
//! and again after every response, so once the user moves the map no further
//! results from the stale session reach the store. Items already applied are
//! kept.

mod source;

pub use source::{
    HttpPageSource, PageRequest, PageResponse, PageSource, DEFAULT_PAGE_TIMEOUT, POSITIONS_PATH,
};

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coord::{Viewport, ViewportFingerprint};
use crate::engine::IngestSender;

/// Default page size for backfill requests.
pub const DEFAULT_BACKFILL_PAGE_SIZE: u32 = 1000;

/// Default cap on items loaded by one session.
pub const DEFAULT_BACKFILL_CAP: usize = 10_000;

/// Errors while fetching a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackfillError {
    /// Network failure or timeout.
    #[error("page request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("page {page} returned HTTP {status}")]
    Status { status: u16, page: u32 },

    /// Body was not a valid page.
    #[error("invalid page response: {0}")]
    Decode(String),
}

/// Backfill settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Run a backfill when the engine starts.
    pub enabled: bool,
    /// Items requested per page.
    pub page_size: u32,
    /// Maximum items per session.
    pub cap: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            page_size: DEFAULT_BACKFILL_PAGE_SIZE,
            cap: DEFAULT_BACKFILL_CAP,
        }
    }
}

impl BackfillConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the page size (at least 1).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }
}

/// Progress of one backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSession {
    /// Next page to request (1-based).
    pub cursor: u32,
    /// Items received so far.
    pub received: usize,
    /// Hard cap on items.
    pub cap: usize,
    /// Identity of the viewport this session serves.
    pub fingerprint: ViewportFingerprint,
}

impl BackfillSession {
    /// Start a session for a viewport.
    pub fn new(viewport: &Viewport, cap: usize) -> Self {
        Self {
            cursor: 1,
            received: 0,
            cap,
            fingerprint: viewport.fingerprint(),
        }
    }

    /// Whether the live viewport still matches.
    pub fn is_current(&self, live: &Viewport) -> bool {
        live.fingerprint() == self.fingerprint
    }

    /// Items still allowed before the cap.
    pub fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.received)
    }

    /// Whether the cap has been reached.
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }
}

/// How a backfill ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Cap reached or an empty page seen.
    Completed { items: usize, pages: u32 },
    /// Viewport changed or shutdown requested.
    Cancelled { items: usize, pages: u32 },
    /// A page request failed; earlier pages are kept.
    Failed {
        items: usize,
        pages: u32,
        error: BackfillError,
    },
}

impl BackfillOutcome {
    /// Items applied to the store.
    pub fn items(&self) -> usize {
        match self {
            Self::Completed { items, .. }
            | Self::Cancelled { items, .. }
            | Self::Failed { items, .. } => *items,
        }
    }

    /// Pages fetched.
    pub fn pages(&self) -> u32 {
        match self {
            Self::Completed { pages, .. }
            | Self::Cancelled { pages, .. }
            | Self::Failed { pages, .. } => *pages,
        }
    }
}

impl fmt::Display for BackfillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { items, pages } => {
                write!(f, "completed ({} items, {} pages)", items, pages)
            }
            Self::Cancelled { items, pages } => {
                write!(f, "cancelled ({} items, {} pages)", items, pages)
            }
            Self::Failed {
                items,
                pages,
                error,
            } => write!(f, "failed after {} items, {} pages: {}", items, pages, error),
        }
    }
}

/// Runs backfill sessions.
#[derive(Clone)]
pub struct BackfillLoader {
    source: Arc<dyn PageSource>,
    config: BackfillConfig,
    sink: IngestSender,
}

impl BackfillLoader {
    pub fn new(source: Arc<dyn PageSource>, config: BackfillConfig, sink: IngestSender) -> Self {
        Self {
            source,
            config,
            sink,
        }
    }

    /// Load pages for `viewport` until the cap, an empty page, a failure,
    /// or the live viewport moving away.
    pub async fn run(
        &self,
        viewport: Viewport,
        live: watch::Receiver<Viewport>,
        shutdown: CancellationToken,
    ) -> BackfillOutcome {
        let mut session = BackfillSession::new(&viewport, self.config.cap);
        let mut applied = 0usize;
        let mut pages = 0u32;

        info!(
            viewport = %viewport,
            page_size = self.config.page_size,
            cap = self.config.cap,
            "Backfill started"
        );

        let outcome = loop {
            if session.is_full() {
                break BackfillOutcome::Completed {
                    items: applied,
                    pages,
                };
            }
            if !session.is_current(&live.borrow()) {
                debug!(page = session.cursor, "Viewport changed before request");
                break BackfillOutcome::Cancelled {
                    items: applied,
                    pages,
                };
            }

            let request = PageRequest {
                page: session.cursor,
                page_size: self.config.page_size,
                viewport,
            };
            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    break BackfillOutcome::Cancelled { items: applied, pages };
                }
                result = self.source.fetch(request) => result,
            };

            let mut page = match result {
                Ok(page) => page,
                Err(error) => {
                    warn!(page = session.cursor, error = %error, "Backfill page failed");
                    break BackfillOutcome::Failed {
                        items: applied,
                        pages,
                        error,
                    };
                }
            };
            pages += 1;

            if !session.is_current(&live.borrow()) {
                debug!(page = session.cursor, "Viewport changed in flight, page discarded");
                break BackfillOutcome::Cancelled {
                    items: applied,
                    pages,
                };
            }
            if page.items.is_empty() {
                break BackfillOutcome::Completed {
                    items: applied,
                    pages,
                };
            }

            page.items.truncate(session.remaining());
            session.received += page.items.len();
            let decoded = page.decode();
            let accepted = decoded.updates.len();
            debug!(
                page = session.cursor,
                accepted,
                rejected = decoded.rejected,
                total = page.total,
                "Backfill page received"
            );

            if self.sink.upsert(decoded.updates).await.is_err() {
                break BackfillOutcome::Cancelled {
                    items: applied,
                    pages,
                };
            }
            applied += accepted;
            session.cursor += 1;

            tokio::task::yield_now().await;
        };

        match &outcome {
            BackfillOutcome::Failed { .. } => warn!(outcome = %outcome, "Backfill ended"),
            _ => info!(outcome = %outcome, "Backfill ended"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineCommand;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Serves scripted pages in order, then empty pages.
    struct ScriptedPages {
        pages: Mutex<VecDeque<Result<PageResponse, BackfillError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<Result<PageResponse, BackfillError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl PageSource for ScriptedPages {
        fn fetch(
            &self,
            request: PageRequest,
        ) -> BoxFuture<'_, Result<PageResponse, BackfillError>> {
            Box::pin(async move {
                self.requests.lock().push(request);
                let next = self.pages.lock().pop_front();
                next.unwrap_or_else(|| Ok(PageResponse::default()))
            })
        }
    }

    fn items(start: u64, count: u64) -> Vec<Value> {
        (start..start + count)
            .map(|i| json!({"id": i, "lon": 1.0, "lat": 1.0}))
            .collect()
    }

    fn drain(rx: &mut mpsc::Receiver<EngineCommand>) -> usize {
        let mut total = 0;
        while let Ok(command) = rx.try_recv() {
            if let EngineCommand::Upsert(updates) = command {
                total += updates.len();
            }
        }
        total
    }

    fn area() -> Viewport {
        Viewport::new(-10.0, -10.0, 10.0, 10.0, 5.0)
    }

    #[test]
    fn test_session_accounting() {
        let mut session = BackfillSession::new(&area(), 100);
        assert_eq!(session.cursor, 1);
        assert_eq!(session.remaining(), 100);
        session.received = 100;
        assert!(session.is_full());
        assert!(session.is_current(&area()));
        assert!(!session.is_current(&Viewport::world()));
    }

    #[tokio::test]
    async fn test_completes_on_empty_page() {
        let source = ScriptedPages::new(vec![
            Ok(PageResponse::from_items(1, items(0, 3))),
            Ok(PageResponse::from_items(2, items(3, 2))),
        ]);
        let (sink, mut rx) = IngestSender::channel(16);
        let (_tx, live) = watch::channel(area());
        let loader = BackfillLoader::new(source.clone(), BackfillConfig::default().with_page_size(3), sink);

        let outcome = loader.run(area(), live, CancellationToken::new()).await;

        assert_eq!(outcome, BackfillOutcome::Completed { items: 5, pages: 3 });
        assert_eq!(drain(&mut rx), 5);
        let pages: Vec<u32> = source.requests.lock().iter().map(|r| r.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(source.requests.lock()[0].page_size, 3);
    }

    #[tokio::test]
    async fn test_truncates_at_cap() {
        let source = ScriptedPages::new(vec![
            Ok(PageResponse::from_items(1, items(0, 4))),
            Ok(PageResponse::from_items(2, items(4, 4))),
        ]);
        let (sink, mut rx) = IngestSender::channel(16);
        let (_tx, live) = watch::channel(area());
        let loader = BackfillLoader::new(
            source.clone(),
            BackfillConfig::default().with_page_size(4).with_cap(6),
            sink,
        );

        let outcome = loader.run(area(), live, CancellationToken::new()).await;

        assert_eq!(outcome, BackfillOutcome::Completed { items: 6, pages: 2 });
        assert_eq!(drain(&mut rx), 6);
        assert_eq!(source.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_pages() {
        let source = ScriptedPages::new(vec![
            Ok(PageResponse::from_items(1, items(0, 2))),
            Err(BackfillError::Status { status: 503, page: 2 }),
        ]);
        let (sink, mut rx) = IngestSender::channel(16);
        let (_tx, live) = watch::channel(area());
        let loader = BackfillLoader::new(source, BackfillConfig::default(), sink);

        let outcome = loader.run(area(), live, CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            BackfillOutcome::Failed { items: 2, pages: 1, .. }
        ));
        assert_eq!(drain(&mut rx), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_request() {
        let source = ScriptedPages::new(vec![Ok(PageResponse::from_items(1, items(0, 2)))]);
        let (sink, _rx) = IngestSender::channel(16);
        let (_tx, live) = watch::channel(Viewport::world());
        let loader = BackfillLoader::new(source.clone(), BackfillConfig::default(), sink);

        let outcome = loader.run(area(), live, CancellationToken::new()).await;

        assert_eq!(outcome, BackfillOutcome::Cancelled { items: 0, pages: 0 });
        assert!(source.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_items_not_counted_as_applied() {
        let mut raw = items(0, 2);
        raw.push(json!({"id": "bad", "lon": "NaN", "lat": 0.0}));
        let source = ScriptedPages::new(vec![Ok(PageResponse::from_items(1, raw))]);
        let (sink, mut rx) = IngestSender::channel(16);
        let (_tx, live) = watch::channel(area());
        let loader = BackfillLoader::new(source, BackfillConfig::default(), sink);

        let outcome = loader.run(area(), live, CancellationToken::new()).await;

        assert_eq!(outcome.items(), 2);
        assert_eq!(drain(&mut rx), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels() {
        struct Never;
        impl PageSource for Never {
            fn fetch(
                &self,
                _request: PageRequest,
            ) -> BoxFuture<'_, Result<PageResponse, BackfillError>> {
                Box::pin(futures::future::pending())
            }
        }

        let (sink, _rx) = IngestSender::channel(16);
        let (_tx, live) = watch::channel(area());
        let loader = BackfillLoader::new(Arc::new(Never), BackfillConfig::default(), sink);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = loader.run(area(), live, shutdown).await;
        assert_eq!(outcome, BackfillOutcome::Cancelled { items: 0, pages: 0 });
    }
}
