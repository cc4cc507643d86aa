//! Live update feed with a primary channel and a credentialed fallback.
//!
//! # Architecture
//!
//! ```text
//!            start()
//!               │
//!      ┌────────┴─────────┐
//!      ▼                  ▼
//!  primary runner    fallback timer (1.5 s, fires once)
//!      │                  │ primary not connected
//!      │                  │ and credential present?
//!      │                  ▼
//!      │            secondary runner
//!      │                  │
//!      └──► decode ◄──────┘
//!             │
//!             ▼
//!       IngestSender ──► engine reactor
//! ```
//!
//! Each runner reconnects on its own with [`ReconnectPolicy`]. Losing the
//! primary never tears down an open secondary. All tasks hang off one
//! cancellation token, so [`TransportManager::stop`] ends every connection
//! and timer at once.

mod backoff;
mod channel;
mod primary;
mod runner;
mod secondary;
mod status;

pub use backoff::{
    Backoff, ReconnectPolicy, DEFAULT_RECONNECT_JITTER, DEFAULT_RECONNECT_MAX,
    DEFAULT_RECONNECT_MIN, DEFAULT_RECONNECT_MULTIPLIER, MAX_RECONNECT_MULTIPLIER,
    MIN_RECONNECT_FLOOR,
};
pub use channel::{ChannelEvent, ChannelKind, EventStream, PushChannel, WsChannel};
pub use primary::{decode_primary, EVENT_POSITION, EVENT_POSITION_BATCH};
pub use runner::Decoder;
pub use secondary::{
    decode_secondary, subscription_for_viewport, subscription_message, world_bounding_boxes,
    DEFAULT_SECONDARY_URL, SUBSCRIBED_MESSAGE_TYPES,
};
pub use status::{
    CloseInfo, LinkState, TransportState, TransportStatus, TransportStatusHandle,
    MESSAGE_SNIPPET_CHARS, MESSAGE_SNIPPET_INTERVAL,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::IngestSender;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::logging::mask_credential;

/// Default primary server.
pub const DEFAULT_PRIMARY_URL: &str = "ws://localhost:8000";

/// Default path of the primary position feed.
pub const DEFAULT_PRIMARY_PATH: &str = "/ws/positions";

/// Default wait for the primary before opening the fallback.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(1500);

/// Errors raised by push channels.
///
/// None of these are fatal; they feed reconnects and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("{channel} channel connect failed: {reason}")]
    Connect { channel: ChannelKind, reason: String },

    /// The subscription frame could not be sent.
    #[error("{channel} channel subscription failed: {reason}")]
    Subscribe { channel: ChannelKind, reason: String },

    /// The subscription frame could not be encoded.
    #[error("failed to encode subscription: {0}")]
    Encode(String),
}

/// Transport settings.
#[derive(Clone, PartialEq)]
pub struct TransportConfig {
    /// Base URL of the primary server.
    pub primary_url: String,
    /// Path of the primary feed on that server.
    pub primary_path: String,
    /// Secondary stream endpoint.
    pub secondary_url: String,
    /// Credential for the secondary stream. Without it there is no fallback.
    pub credential: Option<String>,
    /// Master switch for the secondary stream.
    pub fallback_enabled: bool,
    /// How long the primary gets before the fallback is considered.
    pub fallback_delay: Duration,
    /// Reconnect behaviour for both channels.
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            primary_path: DEFAULT_PRIMARY_PATH.to_string(),
            secondary_url: DEFAULT_SECONDARY_URL.to_string(),
            credential: None,
            fallback_enabled: true,
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("primary_url", &self.primary_url)
            .field("primary_path", &self.primary_path)
            .field("secondary_url", &self.secondary_url)
            .field("credential", &self.credential.as_deref().map(mask_credential))
            .field("fallback_enabled", &self.fallback_enabled)
            .field("fallback_delay", &self.fallback_delay)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl TransportConfig {
    pub fn with_primary_url(mut self, url: impl Into<String>) -> Self {
        self.primary_url = url.into();
        self
    }

    pub fn with_primary_path(mut self, path: impl Into<String>) -> Self {
        self.primary_path = path.into();
        self
    }

    pub fn with_secondary_url(mut self, url: impl Into<String>) -> Self {
        self.secondary_url = url.into();
        self
    }

    /// Set the fallback credential. Blank values clear it.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        let credential = credential.into();
        let trimmed = credential.trim();
        self.credential = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Full primary endpoint: URL joined with path.
    pub fn primary_endpoint(&self) -> String {
        let base = self.primary_url.trim_end_matches('/');
        if self.primary_path.is_empty() {
            return base.to_string();
        }
        if self.primary_path.starts_with('/') {
            format!("{}{}", base, self.primary_path)
        } else {
            format!("{}/{}", base, self.primary_path)
        }
    }

    /// Whether the secondary may be opened at all.
    pub fn fallback_available(&self) -> bool {
        self.fallback_enabled && self.credential.is_some()
    }

    /// Build the WebSocket channels described by this config.
    ///
    /// The secondary is `None` unless a credential is configured and the
    /// fallback is enabled.
    pub fn websocket_channels(
        &self,
    ) -> Result<(Arc<dyn PushChannel>, Option<Arc<dyn PushChannel>>), TransportError> {
        let primary: Arc<dyn PushChannel> =
            Arc::new(WsChannel::new(ChannelKind::Primary, self.primary_endpoint()));

        let secondary = match (&self.credential, self.fallback_enabled) {
            (Some(credential), true) => {
                let frame = subscription_message(credential, world_bounding_boxes())?;
                let channel = WsChannel::new(ChannelKind::Secondary, self.secondary_url.clone())
                    .with_subscription(frame);
                Some(Arc::new(channel) as Arc<dyn PushChannel>)
            }
            _ => None,
        };

        Ok((primary, secondary))
    }
}

/// Owns the channel runners and the fallback timer.
pub struct TransportManager {
    config: TransportConfig,
    primary: Arc<dyn PushChannel>,
    secondary: Option<Arc<dyn PushChannel>>,
    sink: IngestSender,
    status: TransportStatusHandle,
    lifecycle: Lifecycle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportManager {
    /// Create a manager over explicit channels.
    ///
    /// `secondary` stands for "fallback credential present"; pass `None`
    /// when there is none. `shutdown` is usually a child of the engine's
    /// root token.
    pub fn new(
        config: TransportConfig,
        primary: Arc<dyn PushChannel>,
        secondary: Option<Arc<dyn PushChannel>>,
        sink: IngestSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            primary,
            secondary,
            sink,
            status: TransportStatusHandle::new(),
            lifecycle: Lifecycle::new(),
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Diagnostics handle.
    pub fn status(&self) -> TransportStatusHandle {
        self.status.clone()
    }

    /// Current lifecycle phase.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Open the primary and arm the fallback timer.
    ///
    /// Returns `false` (and does nothing) unless the manager is idle.
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> bool {
        if !self.lifecycle.begin_start() {
            warn!(state = %self.lifecycle.state(), "Transport start ignored");
            return false;
        }

        info!(
            primary = self.primary.endpoint(),
            fallback = self.secondary.is_some() && self.config.fallback_enabled,
            credential = %self.config.credential.as_deref().map(mask_credential).unwrap_or_else(|| "none".into()),
            "Starting transport"
        );

        self.tasks.push(tokio::spawn(runner::run_channel(
            Arc::clone(&self.primary),
            decode_primary,
            self.sink.clone(),
            self.status.clone(),
            self.config.reconnect.clone(),
            self.shutdown.child_token(),
        )));

        let secondary = if self.config.fallback_enabled {
            self.secondary.clone()
        } else {
            None
        };
        self.tasks.push(tokio::spawn(fallback_timer(
            self.config.fallback_delay,
            self.config.fallback_enabled,
            secondary,
            self.sink.clone(),
            self.status.clone(),
            self.config.reconnect.clone(),
            self.shutdown.child_token(),
        )));

        self.lifecycle.mark_running();
        true
    }

    /// Close every channel and cancel every timer. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Transport task ended abnormally");
            }
        }
        self.status.reset_links();
        info!("Transport stopped");
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Wait once, then open the secondary if the primary is not connected.
async fn fallback_timer(
    delay: Duration,
    enabled: bool,
    secondary: Option<Arc<dyn PushChannel>>,
    sink: IngestSender,
    status: TransportStatusHandle,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    if status.link(ChannelKind::Primary) == LinkState::Connected {
        debug!("Primary connected in time, fallback not needed");
        return;
    }
    if !enabled {
        info!("Fallback disabled, relying on viewport polling");
        return;
    }
    let Some(secondary) = secondary else {
        info!("No fallback credential, relying on viewport polling");
        return;
    };

    info!(
        endpoint = secondary.endpoint(),
        delay_ms = delay.as_millis() as u64,
        "Primary not connected, opening fallback"
    );
    status.mark_fallback_opened();
    runner::run_channel(secondary, decode_secondary, sink, status, policy, shutdown).await;
}
