//! Tidewatch - live vessel position engine for map dashboards.
//!
//! This library ingests object position updates from several transports,
//! keeps one authoritative record per tracked object, and publishes bounded,
//! flicker-free snapshots of the visible set to an external rendering surface.
//!
//! # Architecture
//!
//! ```text
//!  TransportManager ──┐
//!  (primary/fallback) │
//!  BackfillLoader ────┼──► IngestSender ──► Reactor task ──► ViewportCuller ──► RenderBridge ──► surface
//!  ViewportPoller ────┘    (mpsc queue)     (owns FeatureStore)  (stable sampling)   (latest-wins)
//! ```
//!
//! The reactor task is the only owner of the [`store::FeatureStore`]. Producers
//! talk to it exclusively through [`engine::IngestSender`], so updates are
//! applied strictly in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use tidewatch::config::ConfigFile;
//! use tidewatch::engine::TrackingEngine;
//!
//! let config = ConfigFile::load()?;
//! let mut engine = TrackingEngine::builder(config.engine_config(), surface)
//!     .websocket_channels()?
//!     .http_endpoints(&config.api)?
//!     .start()?;
//!
//! engine.set_viewport(viewport);
//! // ...
//! engine.stop().await;
//! ```

pub mod backfill;
pub mod config;
pub mod coord;
pub mod cull;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod poller;
pub mod render;
pub mod store;
pub mod transport;
pub mod wire;

/// Crate version, as reported by the CLI banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
