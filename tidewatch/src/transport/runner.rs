//! Connection loop for a single push channel.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ChannelEvent, LinkState, PushChannel, ReconnectPolicy, TransportStatusHandle};
use crate::engine::IngestSender;
use crate::wire::Decoded;

/// Turns one raw text frame into updates.
pub type Decoder = fn(&str) -> Decoded;

/// Why a connection ended.
enum Disconnect {
    /// Peer closed or the stream failed; reconnect.
    Lost,
    /// Shutdown requested or the engine is gone; stop for good.
    Finished,
}

/// Keep `channel` connected until `shutdown` fires.
///
/// Each text frame is decoded and forwarded to the engine. Lost connections
/// are retried with the policy's backoff, which resets after every
/// successful connect.
pub(crate) async fn run_channel(
    channel: Arc<dyn PushChannel>,
    decoder: Decoder,
    sink: IngestSender,
    status: TransportStatusHandle,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) {
    let kind = channel.kind();
    let mut backoff = policy.backoff();

    loop {
        status.set_link(kind, LinkState::Connecting);
        debug!(channel = %kind, endpoint = channel.endpoint(), "Connecting");

        let opened = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = channel.open() => result,
        };

        match opened {
            Ok(events) => {
                backoff.reset();
                status.set_link(kind, LinkState::Connected);
                info!(channel = %kind, endpoint = channel.endpoint(), "Channel connected");

                let ended = pump_events(events, decoder, &sink, &status, kind, &shutdown).await;
                if let Disconnect::Finished = ended {
                    break;
                }
            }
            Err(e) => {
                warn!(channel = %kind, error = %e, "Channel connect failed");
            }
        }

        status.set_link(kind, LinkState::Down);
        let delay = backoff.next_delay();
        debug!(
            channel = %kind,
            delay_ms = delay.as_millis() as u64,
            attempt = backoff.attempts(),
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status.set_link(kind, LinkState::Idle);
    debug!(channel = %kind, "Channel runner stopped");
}

async fn pump_events(
    mut events: super::EventStream,
    decoder: Decoder,
    sink: &IngestSender,
    status: &TransportStatusHandle,
    kind: super::ChannelKind,
    shutdown: &CancellationToken,
) -> Disconnect {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return Disconnect::Finished,
            event = events.next() => event,
        };

        match event {
            Some(ChannelEvent::Message(raw)) => {
                status.record_message(&raw, Instant::now());
                let decoded = decoder(&raw);
                status.record_decoded(decoded.accepted(), decoded.rejected);
                if decoded.is_empty() {
                    continue;
                }
                if sink.ingest(decoded).await.is_err() {
                    debug!(channel = %kind, "Engine gone, dropping channel");
                    return Disconnect::Finished;
                }
            }
            Some(ChannelEvent::Closed { code, reason }) => {
                info!(channel = %kind, code = ?code, reason = %reason, "Channel closed");
                status.record_close(kind, code, reason);
                return Disconnect::Lost;
            }
            Some(ChannelEvent::Error(e)) => {
                warn!(channel = %kind, error = %e, "Channel error");
                status.record_close(kind, None, e);
                return Disconnect::Lost;
            }
            None => {
                info!(channel = %kind, "Channel stream ended");
                status.record_close(kind, None, "stream ended".to_string());
                return Disconnect::Lost;
            }
        }
    }
}
