//! The message data model.
//!
//! On the wire a message is a flat record with one nullable column per
//! payload shape.  [`Message`] converts through [`MessageRecord`] in both
//! directions, so every JSON message, whether it arrives over REST or over
//! the realtime channel, is schema-checked before any code sees it.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_FILE_NAME_LENGTH, MAX_TEXT_LENGTH};
use crate::error::ValidationError;
use crate::types::{ConversationId, MessageId, PlayerId, UserId};

/// Discriminant stored in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    File,
    PlayerReference,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
            MessageKind::PlayerReference => "player_reference",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "file" => Some(MessageKind::File),
            "player_reference" => Some(MessageKind::PlayerReference),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// Attachment metadata carried by `file` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Storage path, or an absolute (possibly signed) URL once resolved.
    pub url: String,
    /// Display name shown to the user.
    pub name: String,
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
}

impl FileMeta {
    pub fn has_absolute_url(&self) -> bool {
        self.url.starts_with("https://") || self.url.starts_with("http://")
    }
}

/// The type-specific body of a message.  Exactly one shape per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    File(FileMeta),
    PlayerReference(PlayerId),
    /// Translation key interpreted by the presentation layer.
    System(String),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Text(_) => MessageKind::Text,
            MessagePayload::File(_) => MessageKind::File,
            MessagePayload::PlayerReference(_) => MessageKind::PlayerReference,
            MessagePayload::System(_) => MessageKind::System,
        }
    }

    /// Assemble a payload from the nullable columns of a record.
    pub fn from_parts(
        kind: MessageKind,
        content: Option<String>,
        file: Option<FileMeta>,
        player_id: Option<PlayerId>,
    ) -> Result<Self, ValidationError> {
        let payload = match kind {
            MessageKind::Text | MessageKind::System => {
                if file.is_some() || player_id.is_some() {
                    return Err(ValidationError::UnexpectedField(kind.as_str()));
                }
                let content = content.ok_or(ValidationError::MissingField("content"))?;
                if kind == MessageKind::Text {
                    MessagePayload::Text(content)
                } else {
                    MessagePayload::System(content)
                }
            }
            MessageKind::File => {
                if player_id.is_some() {
                    return Err(ValidationError::UnexpectedField(kind.as_str()));
                }
                MessagePayload::File(file.ok_or(ValidationError::MissingField("file"))?)
            }
            MessageKind::PlayerReference => {
                if file.is_some() {
                    return Err(ValidationError::UnexpectedField(kind.as_str()));
                }
                MessagePayload::PlayerReference(
                    player_id.ok_or(ValidationError::MissingField("player_id"))?,
                )
            }
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            MessagePayload::Text(content) => {
                if content.trim().is_empty() {
                    return Err(ValidationError::EmptyContent);
                }
                let len = content.chars().count();
                if len > MAX_TEXT_LENGTH {
                    return Err(ValidationError::ContentTooLong {
                        len,
                        max: MAX_TEXT_LENGTH,
                    });
                }
            }
            MessagePayload::File(file) => {
                if file.url.trim().is_empty() {
                    return Err(ValidationError::InvalidFile("url is empty"));
                }
                if file.name.trim().is_empty() {
                    return Err(ValidationError::InvalidFile("name is empty"));
                }
                if file.name.chars().count() > MAX_FILE_NAME_LENGTH {
                    return Err(ValidationError::InvalidFile("name is too long"));
                }
                if !file.mime_type.contains('/') {
                    return Err(ValidationError::InvalidFile("mime type is malformed"));
                }
                if file.size == 0 {
                    return Err(ValidationError::InvalidFile("size is zero"));
                }
            }
            MessagePayload::PlayerReference(_) => {}
            MessagePayload::System(key) => {
                if !is_translation_key(key) {
                    return Err(ValidationError::InvalidSystemKey(key.clone()));
                }
            }
        }
        Ok(())
    }

    /// Split back into nullable columns `(content, file, player_id)`.
    pub fn to_parts(&self) -> (Option<String>, Option<FileMeta>, Option<PlayerId>) {
        match self {
            MessagePayload::Text(c) | MessagePayload::System(c) => (Some(c.clone()), None, None),
            MessagePayload::File(f) => (None, Some(f.clone()), None),
            MessagePayload::PlayerReference(p) => (None, None, Some(*p)),
        }
    }
}

fn is_translation_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.ends_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub payload: MessagePayload,
    /// Set once the counterpart has read the message.
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        payload: MessagePayload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            payload,
            read_at: None,
            created_at,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Flat wire/row shape of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file: Option<FileMeta>,
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = ValidationError;

    fn try_from(r: MessageRecord) -> Result<Self, Self::Error> {
        let payload = MessagePayload::from_parts(r.kind, r.content, r.file, r.player_id)?;
        Ok(Message {
            id: r.id,
            conversation_id: r.conversation_id,
            sender_id: r.sender_id,
            payload,
            read_at: r.read_at,
            created_at: r.created_at,
        })
    }
}

impl From<Message> for MessageRecord {
    fn from(m: Message) -> Self {
        let kind = m.kind();
        let (content, file, player_id) = m.payload.to_parts();
        MessageRecord {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            kind,
            content,
            file,
            player_id,
            read_at: m.read_at,
            created_at: m.created_at,
        }
    }
}

/// Current time at the precision the store keeps (microseconds), so a
/// timestamp survives a write/read cycle unchanged.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn text(content: &str) -> Message {
        Message::new(
            ConversationId::new(),
            UserId::new(),
            MessagePayload::Text(content.to_string()),
            timestamp_now(),
        )
    }

    #[test]
    fn text_message_json_shape() {
        let msg = text("Hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["content"], "Hello");
        assert!(value["file"].is_null());
        assert!(value["read_at"].is_null());
    }

    #[test]
    fn text_without_content_is_rejected() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "conversation_id": Uuid::new_v4(),
            "sender_id": Uuid::new_v4(),
            "type": "text",
            "created_at": "2026-01-01T10:00:00Z",
        });
        assert!(serde_json::from_value::<Message>(json).is_err());
    }

    #[test]
    fn file_message_requires_metadata() {
        let err = MessagePayload::from_parts(MessageKind::File, None, None, None).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("file"));
    }

    #[test]
    fn player_reference_rejects_stray_file() {
        let file = FileMeta {
            url: "a/b.pdf".into(),
            name: "b.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 10,
        };
        let err = MessagePayload::from_parts(
            MessageKind::PlayerReference,
            None,
            Some(file),
            Some(PlayerId(Uuid::new_v4())),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::UnexpectedField("player_reference"));
    }

    #[test]
    fn blank_text_is_invalid() {
        assert_eq!(
            MessagePayload::Text("   ".into()).validate(),
            Err(ValidationError::EmptyContent)
        );
    }

    #[test]
    fn over_long_text_is_invalid() {
        let long = "x".repeat(MAX_TEXT_LENGTH + 1);
        assert!(matches!(
            MessagePayload::Text(long).validate(),
            Err(ValidationError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn system_keys_must_look_like_translation_keys() {
        assert!(MessagePayload::System("conversation.blocked".into())
            .validate()
            .is_ok());
        assert!(MessagePayload::System("Hello there".into())
            .validate()
            .is_err());
        assert!(MessagePayload::System(".leading".into()).validate().is_err());
    }

    #[test]
    fn absolute_urls_are_detected() {
        let mut file = FileMeta {
            url: "conv/abc.pdf".into(),
            name: "abc.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 1,
        };
        assert!(!file.has_absolute_url());
        file.url = "https://cdn.example.com/abc.pdf".into();
        assert!(file.has_absolute_url());
    }
}
