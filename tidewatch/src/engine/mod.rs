//! The tracking engine: wiring, reactor and host handle.
//!
//! # Ownership
//!
//! ```text
//!                        EngineHandle (host)
//!        set_viewport │        │ stats/object/clear/flush_now
//!                     ▼        ▼
//!   watch<Viewport> ────► Reactor task ◄──── IngestSender ◄── transport runners
//!        │                 owns FeatureStore                ◄── backfill
//!        └──► poller (debounce) ──────────────────────────► ◄── poller
//! ```
//!
//! The reactor is the only code that touches the store. Everything else
//! sends [`EngineCommand`]s, so "last write wins" is decided by arrival order
//! on a single queue. All background tasks hang off one root
//! [`CancellationToken`]; [`EngineHandle::stop`] cancels it, awaits every
//! task and returns the store untouched.

mod command;
mod reactor;

pub use command::{EngineClosed, EngineCommand, IngestSender, DEFAULT_COMMAND_CAPACITY};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backfill::{
    BackfillConfig, BackfillError, BackfillLoader, BackfillOutcome, HttpPageSource, PageSource,
};
use crate::config::ApiConfig;
use crate::coord::Viewport;
use crate::cull::{CullConfig, Snapshot, ViewportCuller};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::poller::{PollerConfig, ViewportPoller};
use crate::render::{
    DetailError, DetailLookup, HttpDetailLookup, RenderBridge, RenderSurface, SelectionEvent,
};
use crate::store::{FeatureStore, ObjectId, StoreStats, TrackedObject};
use crate::transport::{
    PushChannel, TransportConfig, TransportError, TransportManager, TransportStatusHandle,
};
use reactor::Reactor;

/// Errors raised while assembling or starting the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` was called outside a Tokio runtime.
    #[error("tracking engine must be started inside a Tokio runtime")]
    NoRuntime,

    /// The initial viewport has non-finite edges.
    #[error("invalid initial viewport: {0}")]
    InvalidViewport(Viewport),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to build page source: {0}")]
    PageSource(#[from] BackfillError),

    #[error("failed to build detail lookup: {0}")]
    DetailLookup(#[from] DetailError),
}

/// Settings for every engine component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cull: CullConfig,
    pub backfill: BackfillConfig,
    pub poller: PollerConfig,
    pub transport: TransportConfig,
    /// Depth of the reactor's command queue.
    pub command_capacity: usize,
    /// Viewport in effect until the host sets one.
    pub initial_viewport: Viewport,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cull: CullConfig::default(),
            backfill: BackfillConfig::default(),
            poller: PollerConfig::default(),
            transport: TransportConfig::default(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            initial_viewport: Viewport::world(),
        }
    }
}

impl EngineConfig {
    pub fn with_cull(mut self, cull: CullConfig) -> Self {
        self.cull = cull;
        self
    }

    pub fn with_backfill(mut self, backfill: BackfillConfig) -> Self {
        self.backfill = backfill;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    pub fn with_initial_viewport(mut self, viewport: Viewport) -> Self {
        self.initial_viewport = viewport;
        self
    }
}

/// Entry point for building an engine.
pub struct TrackingEngine;

impl TrackingEngine {
    /// Start assembling an engine that draws onto `surface`.
    pub fn builder(config: EngineConfig, surface: Arc<dyn RenderSurface>) -> EngineBuilder {
        EngineBuilder {
            config,
            surface,
            channels: None,
            pages: None,
            detail: None,
        }
    }
}

type ChannelPair = (Arc<dyn PushChannel>, Option<Arc<dyn PushChannel>>);

/// Collects collaborators before [`EngineBuilder::start`].
///
/// Every collaborator is optional: without channels there is no live feed,
/// without a page source there is no backfill or polling, and without a
/// detail lookup selections are ignored.
pub struct EngineBuilder {
    config: EngineConfig,
    surface: Arc<dyn RenderSurface>,
    channels: Option<ChannelPair>,
    pages: Option<Arc<dyn PageSource>>,
    detail: Option<Arc<dyn DetailLookup>>,
}

impl EngineBuilder {
    /// Use explicit push channels. `secondary` is the credentialed fallback.
    pub fn channels(
        mut self,
        primary: Arc<dyn PushChannel>,
        secondary: Option<Arc<dyn PushChannel>>,
    ) -> Self {
        self.channels = Some((primary, secondary));
        self
    }

    /// Use WebSocket channels built from the transport config.
    pub fn websocket_channels(mut self) -> Result<Self, EngineError> {
        self.channels = Some(self.config.transport.websocket_channels()?);
        Ok(self)
    }

    pub fn page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.pages = Some(source);
        self
    }

    pub fn detail_lookup(mut self, lookup: Arc<dyn DetailLookup>) -> Self {
        self.detail = Some(lookup);
        self
    }

    /// Use the HTTP read and detail endpoints below `api.base_url`.
    pub fn http_endpoints(self, api: &ApiConfig) -> Result<Self, EngineError> {
        let pages = HttpPageSource::new(&api.base_url)?;
        let detail = HttpDetailLookup::new(&api.base_url)?;
        Ok(self.page_source(Arc::new(pages)).detail_lookup(Arc::new(detail)))
    }

    /// Spawn the reactor and every producer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<EngineHandle, EngineError> {
        tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let initial = self.config.initial_viewport;
        if !initial.is_finite() {
            return Err(EngineError::InvalidViewport(initial));
        }

        let mut lifecycle = Lifecycle::new();
        lifecycle.begin_start();

        let shutdown = CancellationToken::new();
        let (sender, commands) = IngestSender::channel(self.config.command_capacity);
        let (viewport_tx, viewport_rx) = watch::channel(initial);

        let bridge = Arc::new(RenderBridge::new(self.surface, self.detail));
        let mut tasks = vec![bridge.spawn_delivery(shutdown.child_token())];

        let reactor = Reactor::new(
            ViewportCuller::new(self.config.cull.budget),
            Arc::clone(&bridge),
            viewport_rx.clone(),
            commands,
            self.config.cull.flush_interval,
        );
        let reactor = tokio::spawn(reactor.run(shutdown.child_token()));

        let transport = self.channels.map(|(primary, secondary)| {
            let mut manager = TransportManager::new(
                self.config.transport.clone(),
                primary,
                secondary,
                sender.clone(),
                shutdown.child_token(),
            );
            manager.start();
            manager
        });
        let transport_status = transport
            .as_ref()
            .map(TransportManager::status)
            .unwrap_or_default();

        let loader = self.pages.as_ref().map(|source| {
            BackfillLoader::new(
                Arc::clone(source),
                self.config.backfill.clone(),
                sender.clone(),
            )
        });

        if let Some(source) = self.pages {
            let poller = ViewportPoller::new(source, self.config.poller.clone(), sender.clone());
            tasks.push(tokio::spawn(
                poller.run(viewport_rx.clone(), shutdown.child_token()),
            ));
        }

        let mut handle = EngineHandle {
            sender,
            viewport: viewport_tx,
            viewport_rx,
            bridge,
            transport,
            transport_status,
            loader,
            backfill: None,
            lifecycle,
            shutdown,
            reactor: Some(reactor),
            tasks,
        };

        if self.config.backfill.enabled {
            handle.backfill();
        }

        handle.lifecycle.mark_running();
        info!(
            viewport = %initial,
            live_feed = handle.transport.is_some(),
            read_endpoint = handle.loader.is_some(),
            "Tracking engine started"
        );
        Ok(handle)
    }
}

struct BackfillRun {
    cancel: CancellationToken,
    task: JoinHandle<BackfillOutcome>,
}

/// Host-side control of a running engine.
///
/// Dropping the handle cancels every task but leaves them to wind down on
/// their own; call [`EngineHandle::stop`] to wait for them and recover the
/// store.
pub struct EngineHandle {
    sender: IngestSender,
    viewport: watch::Sender<Viewport>,
    viewport_rx: watch::Receiver<Viewport>,
    bridge: Arc<RenderBridge>,
    transport: Option<TransportManager>,
    transport_status: TransportStatusHandle,
    loader: Option<BackfillLoader>,
    backfill: Option<BackfillRun>,
    lifecycle: Lifecycle,
    shutdown: CancellationToken,
    reactor: Option<JoinHandle<FeatureStore>>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// A sender for host-side producers.
    pub fn ingest(&self) -> IngestSender {
        self.sender.clone()
    }

    /// Current lifecycle phase.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// The viewport culling and polling work against.
    pub fn viewport(&self) -> Viewport {
        *self.viewport.borrow()
    }

    /// Settle on a new viewport.
    ///
    /// Returns `false` for non-finite edges, or when the fingerprint is
    /// unchanged (sub-micro-degree jitter), in which case nothing is
    /// notified. A real change invalidates any running backfill and re-arms
    /// the poller's debounce. It does not mark the store dirty by itself.
    pub fn set_viewport(&self, viewport: Viewport) -> bool {
        if !viewport.is_finite() {
            warn!(viewport = %viewport, "Ignoring non-finite viewport");
            return false;
        }
        let changed = self.viewport.send_if_modified(|current| {
            if current.fingerprint() == viewport.fingerprint() {
                return false;
            }
            *current = viewport;
            true
        });
        if changed {
            debug!(viewport = %viewport, "Viewport settled");
        }
        changed
    }

    /// Adopt the surface's current bounds as the viewport.
    pub fn sync_viewport_from_surface(&self) -> bool {
        match self.bridge.current_bounds() {
            Some(bounds) => self.set_viewport(bounds),
            None => false,
        }
    }

    /// Live transport diagnostics.
    pub fn transport_status(&self) -> TransportStatusHandle {
        self.transport_status.clone()
    }

    /// Store counters.
    pub async fn stats(&self) -> Result<StoreStats, EngineClosed> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(EngineCommand::Stats(tx)).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Current record for one object.
    pub async fn object(&self, id: &ObjectId) -> Result<Option<TrackedObject>, EngineClosed> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Lookup(id.clone(), tx))
            .await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Remove every object. The emptied store publishes on the next tick.
    pub async fn clear(&self) -> Result<(), EngineClosed> {
        self.sender.send(EngineCommand::Clear).await
    }

    /// Cull and publish immediately, dirty or not.
    ///
    /// Yields `None` when the surface is not ready.
    pub async fn flush_now(&self) -> Result<Option<Arc<Snapshot>>, EngineClosed> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(EngineCommand::FlushNow(tx)).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Generation of the last snapshot the surface accepted.
    pub fn delivered_generation(&self) -> u64 {
        self.bridge.delivered_generation()
    }

    /// Request details for an object; the outcome arrives on
    /// [`EngineHandle::subscribe_selection`].
    pub fn select(&self, id: ObjectId) -> bool {
        self.bridge.select(id)
    }

    /// Hit-test a screen point and select the object there.
    pub fn select_at(&self, x: f64, y: f64) -> Option<ObjectId> {
        self.bridge.select_at(x, y)
    }

    pub fn subscribe_selection(&self) -> broadcast::Receiver<SelectionEvent> {
        self.bridge.subscribe_selection()
    }

    /// Start a backfill for the current viewport, cancelling any running one.
    ///
    /// Returns `false` when there is no page source or the engine is stopped.
    pub fn backfill(&mut self) -> bool {
        if self.lifecycle.state() == LifecycleState::Stopped {
            return false;
        }
        let Some(loader) = self.loader.clone() else {
            return false;
        };
        if let Some(previous) = self.backfill.take() {
            previous.cancel.cancel();
        }

        let cancel = self.shutdown.child_token();
        let viewport = self.viewport();
        let live = self.viewport_rx.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { loader.run(viewport, live, token).await });
        self.backfill = Some(BackfillRun { cancel, task });
        true
    }

    /// Wait for the most recent backfill to finish.
    pub async fn wait_backfill(&mut self) -> Option<BackfillOutcome> {
        let run = self.backfill.take()?;
        match run.task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Backfill task ended abnormally");
                None
            }
        }
    }

    /// Stop every producer, timer and the reactor.
    ///
    /// Returns the store as it was at shutdown on the first call and `None`
    /// afterwards.
    pub async fn stop(&mut self) -> Option<FeatureStore> {
        if !self.lifecycle.begin_stop() {
            return None;
        }
        info!("Stopping tracking engine");

        if let Some(transport) = self.transport.as_mut() {
            transport.stop().await;
        }
        self.shutdown.cancel();

        if let Some(outcome) = self.wait_backfill().await {
            debug!(outcome = %outcome, "Backfill finished during shutdown");
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }

        let store = match self.reactor.take()?.await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Engine reactor ended abnormally");
                return None;
            }
        };
        info!(objects = store.len(), "Tracking engine stopped");
        Some(store)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
