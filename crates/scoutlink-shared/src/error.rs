use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories shared by the HTTP API and the client.
///
/// The server serializes the kind next to the human-readable message so the
/// client can decide how to surface a failure without parsing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationRequired,
    NotParticipant,
    ConversationBlocked,
    RateLimited,
    ValidationFailed,
    NotFound,
    Forbidden,
    PayloadTooLarge,
    TransientNetwork,
    MalformedRealtimeEvent,
    Internal,
}

impl ErrorKind {
    /// Kinds shown to the user as an inline, auto-dismissed notice.
    pub fn is_user_facing(self) -> bool {
        matches!(
            self,
            ErrorKind::AuthenticationRequired
                | ErrorKind::NotParticipant
                | ErrorKind::ConversationBlocked
                | ErrorKind::RateLimited
                | ErrorKind::ValidationFailed
                | ErrorKind::Forbidden
                | ErrorKind::PayloadTooLarge
        )
    }

    /// Whether retrying the same request later can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork | ErrorKind::RateLimited | ErrorKind::Internal
        )
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::AuthenticationRequired => 401,
            ErrorKind::NotParticipant | ErrorKind::NotFound => 404,
            ErrorKind::ConversationBlocked | ErrorKind::Forbidden => 403,
            ErrorKind::RateLimited => 429,
            ErrorKind::ValidationFailed | ErrorKind::MalformedRealtimeEvent => 400,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::TransientNetwork => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Best-effort mapping for responses that carry no `kind` field.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::ValidationFailed,
            401 => ErrorKind::AuthenticationRequired,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            413 => ErrorKind::PayloadTooLarge,
            429 => ErrorKind::RateLimited,
            502..=504 => ErrorKind::TransientNetwork,
            _ => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::AuthenticationRequired => "authentication required",
            ErrorKind::NotParticipant => "not a participant",
            ErrorKind::ConversationBlocked => "conversation blocked",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::ValidationFailed => "validation failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::PayloadTooLarge => "payload too large",
            ErrorKind::TransientNetwork => "network error",
            ErrorKind::MalformedRealtimeEvent => "malformed realtime event",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(label)
    }
}

/// A message payload that parsed but violates the per-type rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field not allowed for {0} messages")]
    UnexpectedField(&'static str),

    #[error("Message content must not be empty")]
    EmptyContent,

    #[error("Message content too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("File metadata is incomplete: {0}")]
    InvalidFile(&'static str),

    #[error("System message key is not well-formed: {0}")]
    InvalidSystemKey(String),

    #[error("System messages cannot be sent by clients")]
    SystemNotAllowed,
}

/// Failure to decode a wire payload.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    Invalid(#[from] ValidationError),
}
