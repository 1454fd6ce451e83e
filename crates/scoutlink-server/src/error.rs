use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use scoutlink_shared::protocol::ErrorBody;
use scoutlink_shared::{ErrorKind, ValidationError};
use scoutlink_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Conversation not found")]
    NotParticipant,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conversation is blocked")]
    ConversationBlocked,

    #[error("Too many requests, try again later")]
    RateLimited,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("Attachment storage error: {0}")]
    AttachmentStorage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Unauthenticated => ErrorKind::AuthenticationRequired,
            ServerError::NotParticipant => ErrorKind::NotParticipant,
            ServerError::NotFound(_) => ErrorKind::NotFound,
            ServerError::ConversationBlocked => ErrorKind::ConversationBlocked,
            ServerError::RateLimited => ErrorKind::RateLimited,
            ServerError::BadRequest(_) => ErrorKind::ValidationFailed,
            ServerError::Forbidden(_) => ErrorKind::Forbidden,
            ServerError::AttachmentTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ServerError::AttachmentStorage(_) | ServerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            StoreError::Validation(v) => ServerError::BadRequest(v.to_string()),
            other => {
                tracing::error!(error = %other, "store failure");
                ServerError::Internal(other.to_string())
            }
        }
    }
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match &self {
            ServerError::AttachmentStorage(_) => "Attachment storage error".to_string(),
            ServerError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: message,
            kind,
        };

        (status, axum::Json(body)).into_response()
    }
}
