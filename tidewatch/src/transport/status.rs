//! Connection diagnostics shared between channel runners and the host.
//!
//! Nothing in here affects store correctness; it only feeds status lines and
//! debug panels.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::ChannelKind;

/// Characters of the last raw message kept for diagnostics.
pub const MESSAGE_SNIPPET_CHARS: usize = 800;

/// Minimum spacing between message snippet refreshes.
pub const MESSAGE_SNIPPET_INTERVAL: Duration = Duration::from_secs(1);

/// Overall transport health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No channel is open or trying.
    #[default]
    Disconnected,
    /// At least one channel is trying to connect.
    Connecting,
    /// The primary channel is live.
    Connected,
    /// Only the secondary channel is live.
    Fallback,
}

impl TransportState {
    /// Lowercase name for logs and status lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Fallback => "fallback",
        }
    }

    /// Whether updates are flowing from some channel.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Fallback)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Not started, or stopped.
    #[default]
    Idle,
    /// Connect in progress.
    Connecting,
    /// Open and receiving.
    Connected,
    /// Lost; waiting to reconnect.
    Down,
}

/// The most recent channel close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub channel: ChannelKind,
    pub code: Option<u16>,
    pub reason: String,
    pub at: Instant,
}

/// Snapshot of transport diagnostics.
#[derive(Debug, Clone, Default)]
pub struct TransportStatus {
    pub primary: LinkState,
    pub secondary: LinkState,
    /// Whether the fallback timer opened the secondary channel.
    pub fallback_opened: bool,
    /// When any channel last delivered a message.
    pub last_activity: Option<Instant>,
    pub last_close: Option<CloseInfo>,
    /// Leading characters of the last raw message.
    pub last_message: Option<String>,
    last_snippet_at: Option<Instant>,
    /// Items that passed validation.
    pub accepted: u64,
    /// Items dropped by validation.
    pub rejected: u64,
}

impl TransportStatus {
    /// Derived overall state.
    pub fn state(&self) -> TransportState {
        if self.primary == LinkState::Connected {
            TransportState::Connected
        } else if self.secondary == LinkState::Connected {
            TransportState::Fallback
        } else if self.primary == LinkState::Connecting || self.secondary == LinkState::Connecting
        {
            TransportState::Connecting
        } else {
            TransportState::Disconnected
        }
    }

    /// State of one channel.
    pub fn link(&self, kind: ChannelKind) -> LinkState {
        match kind {
            ChannelKind::Primary => self.primary,
            ChannelKind::Secondary => self.secondary,
        }
    }

    /// The channel currently delivering updates, if any.
    pub fn active_channel(&self) -> Option<ChannelKind> {
        match self.state() {
            TransportState::Connected => Some(ChannelKind::Primary),
            TransportState::Fallback => Some(ChannelKind::Secondary),
            _ => None,
        }
    }
}

/// Cloneable shared handle to [`TransportStatus`].
#[derive(Debug, Clone, Default)]
pub struct TransportStatusHandle {
    inner: Arc<Mutex<TransportStatus>>,
}

impl TransportStatusHandle {
    /// Create a handle with everything idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current diagnostics.
    pub fn snapshot(&self) -> TransportStatus {
        self.inner.lock().clone()
    }

    /// Derived overall state.
    pub fn state(&self) -> TransportState {
        self.inner.lock().state()
    }

    /// State of one channel.
    pub fn link(&self, kind: ChannelKind) -> LinkState {
        self.inner.lock().link(kind)
    }

    pub(crate) fn set_link(&self, kind: ChannelKind, state: LinkState) {
        let mut status = self.inner.lock();
        match kind {
            ChannelKind::Primary => status.primary = state,
            ChannelKind::Secondary => status.secondary = state,
        }
    }

    pub(crate) fn mark_fallback_opened(&self) {
        self.inner.lock().fallback_opened = true;
    }

    /// Note a raw inbound message, refreshing the snippet at most once per
    /// [`MESSAGE_SNIPPET_INTERVAL`].
    pub(crate) fn record_message(&self, raw: &str, now: Instant) {
        let mut status = self.inner.lock();
        status.last_activity = Some(now);
        let due = status
            .last_snippet_at
            .map_or(true, |at| now.duration_since(at) >= MESSAGE_SNIPPET_INTERVAL);
        if due {
            status.last_message = Some(raw.chars().take(MESSAGE_SNIPPET_CHARS).collect());
            status.last_snippet_at = Some(now);
        }
    }

    pub(crate) fn record_decoded(&self, accepted: usize, rejected: usize) {
        let mut status = self.inner.lock();
        status.accepted += accepted as u64;
        status.rejected += rejected as u64;
    }

    pub(crate) fn record_close(&self, channel: ChannelKind, code: Option<u16>, reason: String) {
        self.inner.lock().last_close = Some(CloseInfo {
            channel,
            code,
            reason,
            at: Instant::now(),
        });
    }

    pub(crate) fn reset_links(&self) {
        let mut status = self.inner.lock();
        status.primary = LinkState::Idle;
        status.secondary = LinkState::Idle;
    }
}
