//! Debounced corrective fetch on viewport change.
//!
//! Every viewport the host settles on starts a quiet period. A newer viewport
//! during the quiet period restarts it, so a burst of pans and zooms costs a
//! single request for the final view. The result goes through the regular
//! upsert path and then marks the store dirty, which is what makes a fresh
//! viewport re-cull on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backfill::{BackfillError, PageRequest, PageSource};
use crate::coord::Viewport;
use crate::engine::IngestSender;

/// Quiet period after the last viewport change.
pub const DEFAULT_POLL_DEBOUNCE: Duration = Duration::from_millis(800);

/// Items requested per corrective fetch.
pub const DEFAULT_POLL_PAGE_SIZE: u32 = 500;

/// Poller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub debounce: Duration,
    pub page_size: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_POLL_DEBOUNCE,
            page_size: DEFAULT_POLL_PAGE_SIZE,
        }
    }
}

impl PollerConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the page size (at least 1).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Issues one page request per settled viewport.
pub struct ViewportPoller {
    source: Arc<dyn PageSource>,
    config: PollerConfig,
    sink: IngestSender,
}

impl ViewportPoller {
    pub fn new(source: Arc<dyn PageSource>, config: PollerConfig, sink: IngestSender) -> Self {
        Self {
            source,
            config,
            sink,
        }
    }

    /// Watch `viewports` until `shutdown` fires or the sender is dropped.
    ///
    /// Values the receiver has already seen are not polled.
    pub async fn run(self, mut viewports: watch::Receiver<Viewport>, shutdown: CancellationToken) {
        'outer: loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = viewports.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            // Restart the quiet period on every further change.
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'outer,
                    changed = viewports.changed() => {
                        if changed.is_err() {
                            break 'outer;
                        }
                    }
                    _ = tokio::time::sleep(self.config.debounce) => break,
                }
            }

            let viewport = *viewports.borrow_and_update();
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.poll_once(viewport) => result,
            };
            match result {
                Ok(applied) => debug!(viewport = %viewport, applied, "Viewport poll applied"),
                Err(e) => warn!(viewport = %viewport, error = %e, "Viewport poll failed"),
            }
        }

        debug!("Viewport poller stopped");
    }

    /// Fetch the first page for `viewport`, upsert it and mark the store dirty.
    ///
    /// Returns the number of updates applied.
    pub async fn poll_once(&self, viewport: Viewport) -> Result<usize, BackfillError> {
        let request = PageRequest {
            page: 1,
            page_size: self.config.page_size,
            viewport,
        };
        let page = self.source.fetch(request).await?;
        let decoded = page.decode();
        let applied = decoded.updates.len();

        // A closed engine means shutdown is underway; nothing left to do.
        if self.sink.upsert(decoded.updates).await.is_ok() {
            let _ = self.sink.mark_dirty().await;
        }
        Ok(applied)
    }
}
