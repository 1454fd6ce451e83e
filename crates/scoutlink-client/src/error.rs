use thiserror::Error;

use scoutlink_shared::ErrorKind;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server answered with an error body (or at least an error status).
    #[error("{message}")]
    Api { kind: ErrorKind, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Rejected locally because the conversation is blocked.
    #[error("This conversation is blocked")]
    Blocked,

    #[error("Realtime connection error: {0}")]
    Realtime(String),

    #[error("Thread is closed")]
    Closed,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Api { kind, .. } => *kind,
            ClientError::Network(_) | ClientError::Timeout | ClientError::Realtime(_) => {
                ErrorKind::TransientNetwork
            }
            ClientError::Decode(_) | ClientError::Closed => ErrorKind::Internal,
            ClientError::Blocked => ErrorKind::ConversationBlocked,
        }
    }

    pub fn api(kind: ErrorKind, message: impl Into<String>) -> Self {
        ClientError::Api {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout
    }
}
