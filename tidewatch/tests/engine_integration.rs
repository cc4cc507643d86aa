//! Integration tests for the tracking engine.
//!
//! These drive the whole engine through its public API:
//! - producers (push channels, backfill, poller) → reactor → store
//! - cull cadence → render surface
//! - viewport changes cancelling stale backfill pages
//!
//! Run with: `cargo test --test engine_integration`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use tidewatch::backfill::{
    BackfillConfig, BackfillError, BackfillOutcome, PageRequest, PageResponse, PageSource,
};
use tidewatch::coord::Viewport;
use tidewatch::cull::{CullConfig, Snapshot};
use tidewatch::engine::{EngineConfig, EngineHandle, TrackingEngine};
use tidewatch::poller::PollerConfig;
use tidewatch::render::{
    DetailError, DetailLookup, DetailOutcome, ObjectDetails, RenderBridgeError, RenderSurface,
};
use tidewatch::store::{ObjectId, ObjectUpdate};
use tidewatch::transport::{
    ChannelEvent, ChannelKind, EventStream, PushChannel, TransportConfig, TransportError,
    TransportState,
};

// ============================================================================
// Test Doubles
// ============================================================================

/// Surface that records every point set it receives.
#[derive(Default)]
struct RecordingSurface {
    not_ready: AtomicBool,
    received: Mutex<Vec<Vec<String>>>,
}

impl RecordingSurface {
    fn deliveries(&self) -> usize {
        self.received.lock().len()
    }

    fn last(&self) -> Option<Vec<String>> {
        self.received.lock().last().cloned()
    }
}

impl RenderSurface for RecordingSurface {
    fn is_ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }

    fn replace_point_set<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> BoxFuture<'a, Result<(), RenderBridgeError>> {
        Box::pin(async move {
            let ids = snapshot
                .objects()
                .iter()
                .map(|object| object.id.as_str().to_string())
                .collect();
            self.received.lock().push(ids);
            Ok(())
        })
    }

    fn current_bounds(&self) -> Option<Viewport> {
        None
    }

    fn hit_test(&self, x: f64, _y: f64) -> Option<ObjectId> {
        (x >= 0.0).then(|| id("100"))
    }
}

/// Push channel fed from a test-held sender. Opens once; later attempts hang.
struct ScriptedChannel {
    kind: ChannelKind,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl ScriptedChannel {
    fn new(kind: ChannelKind) -> (Arc<Self>, mpsc::UnboundedSender<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            kind,
            events: Mutex::new(Some(rx)),
        });
        (channel, tx)
    }

    /// A channel that never connects.
    fn unreachable(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            events: Mutex::new(None),
        })
    }
}

impl PushChannel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn endpoint(&self) -> &str {
        "scripted://"
    }

    fn open(&self) -> BoxFuture<'_, Result<EventStream, TransportError>> {
        Box::pin(async move {
            let events = self.events.lock().take();
            match events {
                Some(rx) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                })
                .boxed()),
                None => futures::future::pending().await,
            }
        })
    }
}

/// Page source where page 1 answers at once and page 2 waits for a gate.
struct GatedPages {
    requests: Mutex<Vec<PageRequest>>,
    page_two: Notify,
}

impl GatedPages {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            page_two: Notify::new(),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl PageSource for GatedPages {
    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, Result<PageResponse, BackfillError>> {
        Box::pin(async move {
            self.requests.lock().push(request);
            match request.page {
                1 => Ok(PageResponse::from_items(1, items_inside(&request.viewport, 0, 1000))),
                2 => {
                    self.page_two.notified().await;
                    Ok(PageResponse::from_items(2, items_inside(&request.viewport, 1000, 1000)))
                }
                page => Ok(PageResponse::from_items(page, Vec::new())),
            }
        })
    }
}

/// Page source that answers every request with one object at the centre of
/// the requested viewport.
#[derive(Default)]
struct CentrePages {
    requests: Mutex<Vec<PageRequest>>,
}

impl PageSource for CentrePages {
    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, Result<PageResponse, BackfillError>> {
        Box::pin(async move {
            self.requests.lock().push(request);
            let view = request.viewport;
            let item = json!({
                "id": format!("poll-{}", view.west),
                "lon": (view.west + view.east) / 2.0,
                "lat": (view.south + view.north) / 2.0,
            });
            Ok(PageResponse::from_items(1, vec![item]))
        })
    }
}

struct StaticLookup;

impl DetailLookup for StaticLookup {
    fn fetch<'a>(&'a self, id: &'a ObjectId) -> BoxFuture<'a, Result<ObjectDetails, DetailError>> {
        Box::pin(async move {
            let mut attributes = serde_json::Map::new();
            attributes.insert("name".into(), Value::String(format!("Vessel {}", id)));
            Ok(ObjectDetails {
                id: id.clone(),
                attributes,
            })
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn id(raw: &str) -> ObjectId {
    ObjectId::new(raw).unwrap()
}

fn area_a() -> Viewport {
    Viewport::new(-10.0, -10.0, 10.0, 10.0, 5.0)
}

fn area_b() -> Viewport {
    Viewport::new(100.0, 20.0, 120.0, 40.0, 5.0)
}

/// `count` items spread inside `view`, ids starting at `first`.
fn items_inside(view: &Viewport, first: u64, count: u64) -> Vec<Value> {
    (first..first + count)
        .map(|i| {
            let t = (i % 100) as f64 / 100.0;
            json!({
                "id": i,
                "lon": view.west + (view.east - view.west) * t,
                "lat": view.south + (view.north - view.south) * t,
            })
        })
        .collect()
}

/// Engine config with no startup backfill and no poller interference.
fn base_config(budget: usize, viewport: Viewport) -> EngineConfig {
    EngineConfig::default()
        .with_cull(CullConfig::default().with_budget(budget))
        .with_backfill(BackfillConfig::default().with_enabled(false))
        .with_poller(PollerConfig::default().with_debounce(Duration::from_secs(3600)))
        .with_initial_viewport(viewport)
}

async fn wait_for_objects(engine: &EngineHandle, expected: usize) {
    for _ in 0..500 {
        if engine.stats().await.unwrap().objects == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "store never reached {} objects (has {})",
        expected,
        engine.stats().await.unwrap().objects
    );
}

// ============================================================================
// Store Semantics Through The Engine
// ============================================================================

/// Three ids inside the view with budget 10 give a three-entry snapshot, and
/// a new position for one of them replaces it in place.
#[tokio::test]
async fn test_three_objects_then_move_one() {
    let surface = Arc::new(RecordingSurface::default());
    let mut engine = TrackingEngine::builder(base_config(10, area_a()), surface.clone())
        .start()
        .unwrap();
    let ingest = engine.ingest();

    ingest
        .upsert(vec![
            ObjectUpdate::new(id("100"), 1.0, 1.0),
            ObjectUpdate::new(id("200"), 2.0, 2.0),
            ObjectUpdate::new(id("300"), 3.0, 3.0),
        ])
        .await
        .unwrap();
    let snapshot = engine.flush_now().await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 3);

    ingest
        .upsert(vec![ObjectUpdate::new(id("200"), 5.0, -4.0)])
        .await
        .unwrap();
    let snapshot = engine.flush_now().await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 3);
    let moved = snapshot.get(&id("200")).unwrap();
    assert_eq!((moved.position.lon, moved.position.lat), (5.0, -4.0));

    engine.stop().await;
}

#[tokio::test]
async fn test_identical_update_is_idempotent() {
    let surface = Arc::new(RecordingSurface::default());
    let mut engine = TrackingEngine::builder(base_config(10, area_a()), surface)
        .start()
        .unwrap();
    let update = ObjectUpdate::new(id("7"), 1.0, 2.0)
        .with_heading(90.0)
        .with_label("ALBA");

    engine.ingest().upsert(vec![update.clone()]).await.unwrap();
    let first = engine.object(&id("7")).await.unwrap().unwrap();
    engine.ingest().upsert(vec![update]).await.unwrap();
    let second = engine.object(&id("7")).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.stats().await.unwrap().objects, 1);
    engine.stop().await;
}

#[tokio::test]
async fn test_non_finite_update_is_dropped() {
    let surface = Arc::new(RecordingSurface::default());
    let mut engine = TrackingEngine::builder(base_config(10, area_a()), surface)
        .start()
        .unwrap();

    engine
        .ingest()
        .upsert(vec![
            ObjectUpdate::new(id("1"), 1.0, 1.0),
            ObjectUpdate::new(id("1"), f64::NAN, 1.0),
            ObjectUpdate::new(id("2"), 1.0, f64::INFINITY),
        ])
        .await
        .unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.objects, 1);
    assert_eq!(stats.rejected, 2);
    let kept = engine.object(&id("1")).await.unwrap().unwrap();
    assert_eq!(kept.position.lon, 1.0);
    engine.stop().await;
}

// ============================================================================
// Culling
// ============================================================================

#[tokio::test]
async fn test_antimeridian_viewport() {
    let surface = Arc::new(RecordingSurface::default());
    let view = Viewport::new(170.0, -20.0, -170.0, 20.0, 4.0);
    let mut engine = TrackingEngine::builder(base_config(10, view), surface)
        .start()
        .unwrap();

    engine
        .ingest()
        .upsert(vec![
            ObjectUpdate::new(id("east"), 179.0, 0.0),
            ObjectUpdate::new(id("west"), -175.0, 0.0),
            ObjectUpdate::new(id("greenwich"), 0.0, 0.0),
        ])
        .await
        .unwrap();

    let snapshot = engine.flush_now().await.unwrap().unwrap();
    let ids: Vec<&str> = snapshot.objects().iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["east", "west"]);
    engine.stop().await;
}

#[tokio::test]
async fn test_budget_bound_and_stable_subset() {
    let surface = Arc::new(RecordingSurface::default());
    let mut engine = TrackingEngine::builder(base_config(50, area_a()), surface)
        .start()
        .unwrap();

    let updates = (0..1000u64)
        .map(|i| ObjectUpdate::new(ObjectId::from(i), (i % 19) as f64 - 9.0, (i % 17) as f64 - 8.0))
        .collect();
    engine.ingest().upsert(updates).await.unwrap();

    let first = engine.flush_now().await.unwrap().unwrap();
    let second = engine.flush_now().await.unwrap().unwrap();

    assert_eq!(first.visible_count, 1000);
    assert!(first.len() <= 50);
    assert!(!first.is_empty());
    assert_eq!(first.objects(), second.objects());
    assert!(second.generation > first.generation);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cadence_publishes_only_when_dirty() {
    let surface = Arc::new(RecordingSurface::default());
    let mut engine = TrackingEngine::builder(base_config(10, area_a()), surface.clone())
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(surface.deliveries(), 0, "clean store publishes nothing");

    engine
        .ingest()
        .upsert(vec![ObjectUpdate::new(id("1"), 0.0, 0.0)])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(surface.deliveries(), 1);

    // A viewport change alone does not re-cull.
    engine.set_viewport(area_b());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(surface.deliveries(), 1);

    engine.clear().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(surface.deliveries(), 2);
    assert_eq!(surface.last(), Some(Vec::new()));

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unready_surface_defers_publish() {
    let surface = Arc::new(RecordingSurface::default());
    surface.not_ready.store(true, Ordering::SeqCst);
    let mut engine = TrackingEngine::builder(base_config(10, area_a()), surface.clone())
        .start()
        .unwrap();

    engine
        .ingest()
        .upsert(vec![ObjectUpdate::new(id("1"), 0.0, 0.0)])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(surface.deliveries(), 0);
    assert!(engine.flush_now().await.unwrap().is_none());

    surface.not_ready.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(surface.last(), Some(vec!["1".to_string()]));

    engine.stop().await;
}

// ============================================================================
// Backfill
// ============================================================================

/// Page 1 lands, the user moves the map while page 2 is in flight, and the
/// page 2 items never reach the store.
#[tokio::test]
async fn test_backfill_page_discarded_after_viewport_change() {
    let pages = GatedPages::new();
    let config = base_config(2000, area_a())
        .with_backfill(BackfillConfig::default().with_page_size(1000));
    let mut engine = TrackingEngine::builder(config, Arc::new(RecordingSurface::default()))
        .page_source(pages.clone())
        .start()
        .unwrap();

    for _ in 0..500 {
        if pages.request_count() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pages.request_count(), 2);
    wait_for_objects(&engine, 1000).await;

    assert!(engine.set_viewport(area_b()));
    pages.page_two.notify_one();

    let outcome = engine.wait_backfill().await.unwrap();
    assert_eq!(outcome, BackfillOutcome::Cancelled { items: 1000, pages: 2 });
    assert_eq!(engine.stats().await.unwrap().objects, 1000);
    assert!(engine.object(&ObjectId::from(1500)).await.unwrap().is_none());

    engine.stop().await;
}

#[tokio::test]
async fn test_backfill_restart_after_clear() {
    let pages = Arc::new(CentrePages::default());
    let config = base_config(10, area_a())
        .with_backfill(BackfillConfig::default().with_enabled(false).with_cap(3));
    let mut engine = TrackingEngine::builder(config, Arc::new(RecordingSurface::default()))
        .page_source(pages.clone())
        .start()
        .unwrap();

    assert!(engine.backfill());
    let outcome = engine.wait_backfill().await.unwrap();
    // The same object on every page, so only the cap ends it.
    assert_eq!(outcome, BackfillOutcome::Completed { items: 3, pages: 3 });
    assert_eq!(engine.stats().await.unwrap().objects, 1);

    engine.clear().await.unwrap();
    assert_eq!(engine.stats().await.unwrap().objects, 0);
    assert!(engine.backfill());
    engine.wait_backfill().await.unwrap();
    assert_eq!(engine.stats().await.unwrap().objects, 1);

    engine.stop().await;
}

// ============================================================================
// Viewport Poller
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_settled_viewport_polls_and_publishes() {
    let pages = Arc::new(CentrePages::default());
    let surface = Arc::new(RecordingSurface::default());
    let config = base_config(10, area_a()).with_poller(PollerConfig::default());
    let mut engine = TrackingEngine::builder(config, surface.clone())
        .page_source(pages.clone())
        .start()
        .unwrap();

    engine.set_viewport(Viewport::new(20.0, 0.0, 30.0, 10.0, 6.0));
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.set_viewport(area_b());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(pages.requests.lock().is_empty(), "debounce still pending");

    tokio::time::sleep(Duration::from_secs(1)).await;
    let requests = pages.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].viewport, area_b());

    assert_eq!(surface.last(), Some(vec!["poll-100".to_string()]));
    engine.stop().await;
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_primary_feed_reaches_store() {
    let (primary, feed) = ScriptedChannel::new(ChannelKind::Primary);
    let mut engine =
        TrackingEngine::builder(base_config(10, area_a()), Arc::new(RecordingSurface::default()))
            .channels(primary, None)
            .start()
            .unwrap();

    feed.send(ChannelEvent::Message(
        json!({"positions": [
            {"id": 1, "lon": 1.0, "lat": 1.0},
            {"id": 2, "lon": "bad", "lat": 1.0},
            {"id": 3, "lon": 3.0, "lat": 3.0, "cog": 45.0}
        ]})
        .to_string(),
    ))
    .unwrap();

    wait_for_objects(&engine, 2).await;
    let status = engine.transport_status().snapshot();
    assert_eq!(status.state(), TransportState::Connected);
    assert_eq!(status.accepted, 2);
    assert_eq!(status.rejected, 1);
    let third = engine.object(&id("3")).await.unwrap().unwrap();
    assert_eq!(third.heading, 45.0);

    engine.stop().await;
    assert_eq!(
        engine.transport_status().state(),
        TransportState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_fallback_opens_when_primary_silent() {
    let primary = ScriptedChannel::unreachable(ChannelKind::Primary);
    let (secondary, feed) = ScriptedChannel::new(ChannelKind::Secondary);
    let config = base_config(10, area_a())
        .with_transport(TransportConfig::default().with_credential("stream-key"));
    let mut engine = TrackingEngine::builder(config, Arc::new(RecordingSurface::default()))
        .channels(primary, Some(secondary))
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!engine.transport_status().snapshot().fallback_opened);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(engine.transport_status().snapshot().fallback_opened);
    assert_eq!(engine.transport_status().state(), TransportState::Fallback);

    feed.send(ChannelEvent::Message(
        r#"{"MessageType":"PositionReport",
            "MetaData":{"MMSI":244660000,"ShipName":"ALBA"},
            "Message":{"PositionReport":{"UserID":244660000,"Latitude":5.0,"Longitude":4.0,
                       "Cog":91.5,"Sog":12.0,"TrueHeading":511}}}"#
            .to_string(),
    ))
    .unwrap();

    wait_for_objects(&engine, 1).await;
    let vessel = engine.object(&id("244660000")).await.unwrap().unwrap();
    assert_eq!(vessel.heading, 91.5);
    assert_eq!(vessel.label.as_deref(), Some("ALBA"));

    engine.stop().await;
}

// ============================================================================
// Selection And Lifecycle
// ============================================================================

#[tokio::test]
async fn test_selection_outcome_broadcast() {
    let mut engine =
        TrackingEngine::builder(base_config(10, area_a()), Arc::new(RecordingSurface::default()))
            .detail_lookup(Arc::new(StaticLookup))
            .start()
            .unwrap();
    let mut selections = engine.subscribe_selection();

    assert_eq!(engine.select_at(10.0, 10.0), Some(id("100")));
    let event = tokio::time::timeout(Duration::from_secs(1), selections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.id, id("100"));
    match event.outcome {
        DetailOutcome::Loaded(details) => {
            assert_eq!(details.attributes["name"], json!("Vessel 100"));
        }
        other => panic!("expected loaded details, got {:?}", other),
    }

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_keeps_store_and_is_idempotent() {
    let (primary, _feed) = ScriptedChannel::new(ChannelKind::Primary);
    let mut engine =
        TrackingEngine::builder(base_config(10, area_a()), Arc::new(RecordingSurface::default()))
            .channels(primary, None)
            .start()
            .unwrap();
    let ingest = engine.ingest();
    ingest
        .upsert(vec![
            ObjectUpdate::new(id("a"), 0.0, 0.0),
            ObjectUpdate::new(id("b"), 1.0, 1.0),
        ])
        .await
        .unwrap();
    wait_for_objects(&engine, 2).await;

    let store = engine.stop().await.unwrap();
    assert_eq!(store.len(), 2);
    assert!(store.get(&id("a")).is_some());

    assert!(engine.stop().await.is_none());
    assert!(engine.stats().await.is_err());
    assert!(ingest.is_closed());
}
