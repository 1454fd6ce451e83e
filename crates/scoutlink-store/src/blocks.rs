//! Block records.  Any record disables sending for both parties; a record can
//! only be removed by the party that imposed it.

use rusqlite::params;

use scoutlink_shared::message::timestamp_now;
use scoutlink_shared::protocol::{BlockRecord, BlockState};
use scoutlink_shared::{ConversationId, UserId};

use crate::database::{col_ts, col_uuid, encode_ts, Database};
use crate::error::Result;

impl Database {
    /// Record a block imposed by `by`.  Returns `false` if `by` had already
    /// blocked this conversation.
    pub fn block_conversation(&self, conversation_id: ConversationId, by: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO conversation_blocks (conversation_id, blocked_by, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                conversation_id.to_string(),
                by.to_string(),
                encode_ts(&timestamp_now()),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Remove the block imposed by `by`.  Returns `false` when `by` holds no
    /// block on this conversation, including when only the counterpart does.
    pub fn unblock_conversation(&self, conversation_id: ConversationId, by: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversation_blocks WHERE conversation_id = ?1 AND blocked_by = ?2",
            params![conversation_id.to_string(), by.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn list_blocks(&self, conversation_id: ConversationId) -> Result<Vec<BlockRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, blocked_by, created_at
             FROM conversation_blocks
             WHERE conversation_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            Ok(BlockRecord {
                conversation_id: ConversationId(col_uuid(row, 0)?),
                blocked_by: UserId(col_uuid(row, 1)?),
                created_at: col_ts(row, 2)?,
            })
        })?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    pub fn is_blocked(&self, conversation_id: ConversationId) -> Result<bool> {
        let blocked: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM conversation_blocks WHERE conversation_id = ?1)",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(blocked)
    }

    /// Moderation state as seen by `viewer`.
    pub fn block_state(&self, conversation_id: ConversationId, viewer: UserId) -> Result<BlockState> {
        let blocks = self.list_blocks(conversation_id)?;
        Ok(BlockState {
            blocked: !blocks.is_empty(),
            blocked_by_me: blocks.iter().any(|b| b.blocked_by == viewer),
            blocks,
        })
    }
}
