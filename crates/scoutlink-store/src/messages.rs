//! Message rows: insert, cursor pagination, read marking.
//!
//! Messages are totally ordered by `(created_at, id)`.  Every read filters
//! out soft-deleted rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use scoutlink_shared::message::timestamp_now;
use scoutlink_shared::protocol::MessagePage;
use scoutlink_shared::{
    ConversationId, FileMeta, Message, MessageId, MessageKind, MessagePayload, PlayerId, Role,
    UserId,
};

use crate::database::{col_opt_ts, col_opt_uuid, col_ts, col_uuid, encode_ts, Database};
use crate::error::{not_found, Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, type, content, file_url, \
     file_name, file_mime_type, file_size, player_id, read_at, created_at";

impl Database {
    /// Persist a new message and bump the conversation's last activity.
    ///
    /// The store assigns the id and the creation timestamp.
    pub fn insert_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        payload: &MessagePayload,
    ) -> Result<Message> {
        payload.validate()?;
        let message = Message::new(conversation_id, sender_id, payload.clone(), timestamp_now());
        self.insert_message_row(&message)?;
        Ok(message)
    }

    /// Persist a fully-formed message as-is.
    pub fn insert_message_row(&self, message: &Message) -> Result<()> {
        let (content, file, player_id) = message.payload.to_parts();
        let created_at = encode_ts(&message.created_at);

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, type, content, file_url,
                                   file_name, file_mime_type, file_size, player_id, read_at,
                                   created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_string(),
                message.kind().as_str(),
                content,
                file.as_ref().map(|f| f.url.clone()),
                file.as_ref().map(|f| f.name.clone()),
                file.as_ref().map(|f| f.mime_type.clone()),
                file.as_ref().map(|f| f.size as i64),
                player_id.map(|p| p.to_string()),
                message.read_at.as_ref().map(encode_ts),
                created_at,
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET last_activity_at = ?1
             WHERE id = ?2 AND last_activity_at < ?1",
            params![created_at, message.conversation_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fetch a visible message by id.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND deleted_at IS NULL"
        );
        self.conn()
            .query_row(&sql, params![id.to_string()], row_to_message)
            .map_err(not_found)
    }

    /// Load one page of history, oldest first.
    ///
    /// With `before`, only messages strictly older than the cursor message are
    /// returned; a cursor that does not exist in this conversation fails with
    /// [`StoreError::NotFound`] rather than falling back to the newest page.
    /// `limit + 1` rows are read so the extra row decides `has_more`.
    pub fn load_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<MessagePage> {
        let limit = limit.max(1);
        let fetch = i64::from(limit) + 1;

        let mut rows = match before {
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND deleted_at IS NULL
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2"
                );
                let mut stmt = self.conn().prepare(&sql)?;
                let mapped =
                    stmt.query_map(params![conversation_id.to_string(), fetch], row_to_message)?;
                mapped.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(cursor) => {
                let (cursor_ts, cursor_id) = self.cursor_position(conversation_id, cursor)?;
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND deleted_at IS NULL
                       AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?4"
                );
                let mut stmt = self.conn().prepare(&sql)?;
                let mapped = stmt.query_map(
                    params![conversation_id.to_string(), cursor_ts, cursor_id, fetch],
                    row_to_message,
                )?;
                mapped.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        rows.reverse();

        Ok(MessagePage {
            messages: rows,
            has_more,
        })
    }

    /// `(created_at, id)` of a visible cursor message in `conversation_id`.
    fn cursor_position(
        &self,
        conversation_id: ConversationId,
        cursor: MessageId,
    ) -> Result<(String, String)> {
        self.conn()
            .query_row(
                "SELECT created_at, id FROM messages
                 WHERE id = ?1 AND conversation_id = ?2 AND deleted_at IS NULL",
                params![cursor.to_string(), conversation_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// Mark every unread message from the counterpart of `reader_role` as
    /// read.  Returns the rows that changed, with their new read timestamp.
    pub fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader_role: Role,
    ) -> Result<Vec<Message>> {
        let conversation = self.get_conversation(conversation_id)?;
        let counterpart_clause = match reader_role {
            Role::Scout => "sender_id != ?2",
            Role::AcademyAdmin => "sender_id = ?2",
        };
        let now = timestamp_now();

        let tx = self.conn().unchecked_transaction()?;
        let ids: Vec<MessageId> = {
            let sql = format!(
                "SELECT id FROM messages
                 WHERE conversation_id = ?1 AND read_at IS NULL AND deleted_at IS NULL
                   AND {counterpart_clause}"
            );
            let mut stmt = tx.prepare(&sql)?;
            let mapped = stmt.query_map(
                params![conversation_id.to_string(), conversation.scout_id.to_string()],
                |row| col_uuid(row, 0).map(MessageId),
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for id in &ids {
            tx.execute(
                "UPDATE messages SET read_at = ?1 WHERE id = ?2",
                params![encode_ts(&now), id.to_string()],
            )?;
        }
        tx.commit()?;

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.get_message(id)?);
        }

        tracing::debug!(
            conversation = %conversation_id,
            count = updated.len(),
            "marked messages read"
        );
        Ok(updated)
    }

    /// Unread messages from the counterpart of `viewer_role`.
    pub fn unread_count(&self, conversation_id: ConversationId, viewer_role: Role) -> Result<u32> {
        let conversation = self.get_conversation(conversation_id)?;
        let counterpart_clause = match viewer_role {
            Role::Scout => "sender_id != ?2",
            Role::AcademyAdmin => "sender_id = ?2",
        };
        let sql = format!(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND read_at IS NULL AND deleted_at IS NULL
               AND {counterpart_clause}"
        );
        let count: u32 = self.conn().query_row(
            &sql,
            params![conversation_id.to_string(), conversation.scout_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Flag a message as deleted.  Returns `true` if a visible row was hidden.
    pub fn soft_delete_message(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![encode_ts(&at), id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(3)?;
    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message type {kind_str:?}").into(),
        )
    })?;

    let content: Option<String> = row.get(4)?;
    let file_url: Option<String> = row.get(5)?;
    let file = match file_url {
        Some(url) => {
            let size: i64 = row.get::<_, Option<i64>>(8)?.unwrap_or_default();
            Some(FileMeta {
                url,
                name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                mime_type: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                size: u64::try_from(size).unwrap_or_default(),
            })
        }
        None => None,
    };
    let player_id = col_opt_uuid(row, 9)?.map(PlayerId);

    let payload = MessagePayload::from_parts(kind, content, file, player_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: MessageId(col_uuid(row, 0)?),
        conversation_id: ConversationId(col_uuid(row, 1)?),
        sender_id: UserId(col_uuid(row, 2)?),
        payload,
        read_at: col_opt_ts(row, 10)?,
        created_at: col_ts(row, 11)?,
    })
}
