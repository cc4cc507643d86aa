//! Push channel abstraction and the WebSocket implementation.

use std::fmt;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::TransportError;

/// Which slot of the fallback chain a channel occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Primary,
    Secondary,
}

impl ChannelKind {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text payload.
    Message(String),
    /// The peer closed the connection.
    Closed { code: Option<u16>, reason: String },
    /// The connection failed.
    Error(String),
}

/// Stream of events from one connection. Ends when the connection is gone.
pub type EventStream = BoxStream<'static, ChannelEvent>;

/// A connectable push feed.
///
/// `open` resolves once the connection is established; the returned stream
/// then yields everything the peer sends. Reconnection is the caller's job.
pub trait PushChannel: Send + Sync + 'static {
    /// Slot this channel fills.
    fn kind(&self) -> ChannelKind;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;

    /// Connect and return the event stream.
    fn open(&self) -> BoxFuture<'_, Result<EventStream, TransportError>>;
}

/// WebSocket push channel.
pub struct WsChannel {
    kind: ChannelKind,
    url: String,
    subscription: Option<String>,
}

impl WsChannel {
    /// Channel without a subscription frame.
    pub fn new(kind: ChannelKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            subscription: None,
        }
    }

    /// Send `frame` as the first text message after every connect.
    pub fn with_subscription(mut self, frame: impl Into<String>) -> Self {
        self.subscription = Some(frame.into());
        self
    }
}

impl PushChannel for WsChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    fn open(&self) -> BoxFuture<'_, Result<EventStream, TransportError>> {
        Box::pin(async move {
            let (mut socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    channel: self.kind,
                    reason: e.to_string(),
                })?;

            if let Some(frame) = &self.subscription {
                socket
                    .send(Message::Text(frame.clone()))
                    .await
                    .map_err(|e| TransportError::Subscribe {
                        channel: self.kind,
                        reason: e.to_string(),
                    })?;
                debug!(channel = %self.kind, "Subscription frame sent");
            }

            let events = socket.filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(ChannelEvent::Message(text)),
                    Ok(Message::Binary(bytes)) => {
                        String::from_utf8(bytes).ok().map(ChannelEvent::Message)
                    }
                    Ok(Message::Close(frame)) => Some(match frame {
                        Some(frame) => ChannelEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.to_string(),
                        },
                        None => ChannelEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    }),
                    Ok(_) => None,
                    Err(e) => Some(ChannelEvent::Error(e.to_string())),
                }
            });

            Ok(events.boxed())
        })
    }
}
