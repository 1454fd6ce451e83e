//! Per-conversation realtime fan-out.
//!
//! Every open thread holds one WebSocket on `/realtime/{conversation_id}`.
//! The hub keeps one broadcast channel per conversation; handlers publish
//! `message_inserted` / `message_updated` events after the store commits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use scoutlink_shared::protocol::RealtimeEvent;
use scoutlink_shared::ConversationId;

/// Events buffered per conversation before a slow socket is dropped.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<Mutex<HashMap<ConversationId, broadcast::Sender<RealtimeEvent>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationId, broadcast::Sender<RealtimeEvent>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, conversation_id: ConversationId) -> broadcast::Receiver<RealtimeEvent> {
        self.channels()
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to everyone watching the event's conversation.  Returns the
    /// number of subscribers reached.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        let conversation_id = event.message().conversation_id;
        let sender = self.channels().get(&conversation_id).cloned();
        match sender {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, conversation_id: ConversationId) -> usize {
        self.channels()
            .get(&conversation_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels nobody listens to any more.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }
}

/// Pump events from `events` into `socket` until either side goes away.
///
/// A lagging subscriber is disconnected rather than skipped, so its client
/// reconnects and re-fetches the newest page.
pub async fn forward_events(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<RealtimeEvent>,
    conversation_id: ConversationId,
) {
    debug!(conversation = %conversation_id, "Realtime subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode realtime event");
                            continue;
                        }
                    };
                    if socket.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(conversation = %conversation_id, skipped, "Realtime subscriber lagged, closing");
                    let _ = socket.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                // Subscribers only listen; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(conversation = %conversation_id, "Realtime subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoutlink_shared::message::timestamp_now;
    use scoutlink_shared::{Message, MessagePayload, UserId};

    fn inserted(conversation_id: ConversationId) -> RealtimeEvent {
        RealtimeEvent::MessageInserted {
            message: Message::new(
                conversation_id,
                UserId::new(),
                MessagePayload::Text("Trial on Saturday?".into()),
                timestamp_now(),
            ),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_of_that_conversation() {
        let hub = RealtimeHub::new();
        let a = ConversationId::new();
        let b = ConversationId::new();
        let mut rx_a = hub.subscribe(a);
        let mut rx_b = hub.subscribe(b);

        let event = inserted(a);
        assert_eq!(hub.publish(event.clone()), 1);
        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = RealtimeHub::new();
        assert_eq!(hub.publish(inserted(ConversationId::new())), 0);
    }

    #[test]
    fn test_prune_drops_idle_channels() {
        let hub = RealtimeHub::new();
        let a = ConversationId::new();
        let rx = hub.subscribe(a);
        assert_eq!(hub.subscriber_count(a), 1);
        assert_eq!(hub.prune(), 0);

        drop(rx);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.subscriber_count(a), 0);
    }
}
