//! Client settings.

use std::time::Duration;

use scoutlink_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_PAGE_SIZE, ECHO_MATCH_WINDOW_SECS, NOTICE_TTL_SECS,
};
use scoutlink_shared::{ConversationId, UserId};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the messaging API, without a trailing slash.
    pub base_url: String,

    /// Applied to every persist and page request.
    pub request_timeout: Duration,

    /// Messages requested per page.
    pub page_size: u32,

    /// How far apart a pending message and its realtime echo may be created
    /// and still be treated as the same message.
    pub echo_window: chrono::Duration,

    /// How long an inline notice stays up.
    pub notice_ttl: Duration,

    /// First reconnect delay; doubles on each failed attempt.
    pub reconnect_initial: Duration,

    /// Upper bound for the reconnect delay.
    pub reconnect_max: Duration,

    /// Give up after this many consecutive failed attempts.  `None` retries
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            request_timeout: Duration::from_secs(10),
            page_size: DEFAULT_PAGE_SIZE,
            echo_window: chrono::Duration::seconds(ECHO_MATCH_WINDOW_SECS),
            notice_ttl: Duration::from_secs(NOTICE_TTL_SECS),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            max_reconnect_attempts: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// WebSocket URL of a conversation's realtime channel.
    pub fn realtime_url(&self, conversation_id: ConversationId, viewer: UserId) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/realtime/{conversation_id}?access_token={viewer}")
    }
}
