//! REST and realtime wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, ProtocolError, ValidationError};
use crate::message::{FileMeta, Message, MessageKind, MessagePayload};
use crate::types::{ClubId, ConversationId, PlayerId, UserId};

/// Events pushed on a conversation's realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A row was inserted into the message relation.
    MessageInserted { message: Message },
    /// A row changed; only the read timestamp ever changes.
    MessageUpdated { message: Message },
}

impl RealtimeEvent {
    /// Decode and validate a realtime frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let event: RealtimeEvent = serde_json::from_str(text)?;
        event.message().payload.validate()?;
        Ok(event)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn message(&self) -> &Message {
        match self {
            RealtimeEvent::MessageInserted { message } | RealtimeEvent::MessageUpdated { message } => {
                message
            }
        }
    }
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
}

impl SendMessageRequest {
    pub fn new(conversation_id: ConversationId, payload: &MessagePayload) -> Self {
        let (content, file, player_id) = payload.to_parts();
        Self {
            conversation_id,
            kind: payload.kind(),
            content,
            file,
            player_id,
        }
    }

    /// Validate the body; system messages are never accepted from clients.
    pub fn into_payload(self) -> Result<MessagePayload, ValidationError> {
        if self.kind == MessageKind::System {
            return Err(ValidationError::SystemNotAllowed);
        }
        MessagePayload::from_parts(self.kind, self.content, self.file, self.player_id)
    }
}

/// Response of `GET /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Oldest first.
    pub messages: Vec<Message>,
    pub has_more: bool,
}

impl MessagePage {
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            has_more: false,
        }
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockAction {
    Block,
    Unblock,
}

/// Body of `POST /conversations/{id}/block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRequest {
    pub action: BlockAction,
}

/// One party's block on a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub conversation_id: ConversationId,
    pub blocked_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Moderation state of a conversation as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub blocked: bool,
    pub blocked_by_me: bool,
    #[serde(default)]
    pub blocks: Vec<BlockRecord>,
}

/// A scout/club pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub scout_id: UserId,
    pub club_id: ClubId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Body of `POST /conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub club_id: ClubId,
}

/// Last message shown in the inbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Text content, file name, or system key, depending on kind.
    pub preview: Option<String>,
    pub sender_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// One inbox row of the conversation directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    /// Club id for scouts, scout user id for academy admins.
    pub counterpart_id: Uuid,
    pub counterpart_name: String,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: u32,
    pub blocked: bool,
    pub last_activity_at: DateTime<Utc>,
}

/// Response of `POST /attachments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentUpload {
    pub path: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

impl From<AttachmentUpload> for FileMeta {
    fn from(a: AttachmentUpload) -> Self {
        FileMeta {
            url: a.path,
            name: a.name,
            mime_type: a.mime_type,
            size: a.size,
        }
    }
}

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
}
