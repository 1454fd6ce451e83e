//! Realtime subscription for one open thread.
//!
//! The bridge owns the WebSocket, validates every frame, and hands events to
//! the session one at a time over a capacity-1 channel.  It reconnects on its
//! own with exponential backoff and reports each connection state change.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use scoutlink_shared::protocol::RealtimeEvent;
use scoutlink_shared::{ConnectionState, ConversationId, ErrorKind, UserId};

use crate::config::ClientConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Event(RealtimeEvent),
    State(ConnectionState),
}

/// Reconnect delays: starts at `initial`, doubles, never exceeds `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Consecutive failed attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Validate one text frame.  Malformed frames and events for another
/// conversation are logged and dropped.
pub fn decode_frame(text: &str, conversation_id: ConversationId) -> Option<RealtimeEvent> {
    match RealtimeEvent::parse(text) {
        Ok(event) if event.message().conversation_id == conversation_id => Some(event),
        Ok(event) => {
            warn!(
                expected = %conversation_id,
                got = %event.message().conversation_id,
                "Dropping realtime event for another conversation"
            );
            None
        }
        Err(e) => {
            warn!(kind = %ErrorKind::MalformedRealtimeEvent, error = %e, "Dropping realtime frame");
            None
        }
    }
}

/// Start the subscription task.  Abort the handle to tear it down.
pub fn spawn(
    config: &ClientConfig,
    conversation_id: ConversationId,
    viewer: UserId,
) -> (JoinHandle<()>, mpsc::Receiver<BridgeEvent>) {
    let (tx, rx) = mpsc::channel(1);
    let url = config.realtime_url(conversation_id, viewer);
    let backoff = Backoff::new(config.reconnect_initial, config.reconnect_max);
    let handle = tokio::spawn(run(
        url,
        conversation_id,
        tx,
        backoff,
        config.max_reconnect_attempts,
    ));
    (handle, rx)
}

async fn run(
    url: String,
    conversation_id: ConversationId,
    tx: mpsc::Sender<BridgeEvent>,
    mut backoff: Backoff,
    max_attempts: Option<u32>,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(conversation = %conversation_id, "Realtime connected");
                backoff.reset();
                if tx.send(BridgeEvent::State(ConnectionState::Connected)).await.is_err() {
                    return;
                }
                if !pump(stream, conversation_id, &tx).await {
                    return;
                }
            }
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Realtime connect failed");
            }
        }

        if max_attempts.is_some_and(|max| backoff.attempts() >= max) {
            let _ = tx.send(BridgeEvent::State(ConnectionState::Disconnected)).await;
            return;
        }
        if tx.send(BridgeEvent::State(ConnectionState::Reconnecting)).await.is_err() {
            return;
        }
        let delay = backoff.next_delay();
        debug!(conversation = %conversation_id, ?delay, "Reconnecting");
        tokio::time::sleep(delay).await;
    }
}

/// Forward frames until the socket ends.  Returns `false` once the session
/// is gone.
async fn pump<S>(mut stream: S, conversation_id: ConversationId, tx: &mpsc::Sender<BridgeEvent>) -> bool
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if let Some(event) = decode_frame(&text, conversation_id) {
                    if tx.send(BridgeEvent::Event(event)).await.is_err() {
                        return false;
                    }
                }
            }
            Ok(WsMessage::Close(frame)) => {
                debug!(conversation = %conversation_id, ?frame, "Realtime closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Realtime read failed");
                break;
            }
        }
    }
    true
}
