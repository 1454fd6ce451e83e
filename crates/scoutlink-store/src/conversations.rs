//! Conversations and the per-viewer conversation directory.

use rusqlite::params;

use scoutlink_shared::message::timestamp_now;
use scoutlink_shared::protocol::{Conversation, ConversationSummary, LastMessagePreview};
use scoutlink_shared::{ClubId, ConversationId, MessageKind, Role, UserId};

use crate::database::{col_opt_ts, col_opt_uuid, col_ts, col_uuid, encode_ts, Database};
use crate::error::{not_found, Result};

/// SQL literal for a role, as bound into the directory query.
fn role_tag(role: Role) -> &'static str {
    match role {
        Role::Scout => "scout",
        Role::AcademyAdmin => "academy_admin",
    }
}

/// Everything the inbox needs, in one statement.
///
/// "Counterpart" and "unread" both depend on which side the viewer is on:
/// for a scout the other side is every non-scout sender, for an academy
/// admin it is the scout.
const DIRECTORY_SQL: &str = r#"
SELECT c.id,
       c.last_activity_at,
       CASE WHEN ?2 = 'scout' THEN c.club_id ELSE c.scout_id END,
       CASE WHEN ?2 = 'scout' THEN cl.name ELSE u.display_name END,
       lm.type,
       lm.content,
       lm.file_name,
       lm.sender_id,
       lm.created_at,
       (SELECT COUNT(*)
          FROM messages um
         WHERE um.conversation_id = c.id
           AND um.read_at IS NULL
           AND um.deleted_at IS NULL
           AND CASE WHEN ?2 = 'scout'
                    THEN um.sender_id != c.scout_id
                    ELSE um.sender_id = c.scout_id END),
       EXISTS (SELECT 1 FROM conversation_blocks b WHERE b.conversation_id = c.id)
  FROM conversations c
  JOIN clubs cl ON cl.id = c.club_id
  JOIN users u  ON u.id = c.scout_id
  LEFT JOIN messages lm ON lm.id = (
        SELECT m.id
          FROM messages m
         WHERE m.conversation_id = c.id AND m.deleted_at IS NULL
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT 1)
 WHERE (?2 = 'scout' AND c.scout_id = ?1)
    OR (?2 = 'academy_admin'
        AND c.club_id IN (SELECT ca.club_id FROM club_admins ca WHERE ca.user_id = ?1))
 ORDER BY c.last_activity_at DESC, c.id DESC
"#;

impl Database {
    /// Return the conversation for `(scout, club)`, creating it on first use.
    pub fn get_or_create_conversation(&self, scout: UserId, club: ClubId) -> Result<Conversation> {
        let now = encode_ts(&timestamp_now());
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO conversations (id, scout_id, club_id, created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                ConversationId::new().to_string(),
                scout.to_string(),
                club.to_string(),
                now,
            ],
        )?;
        if inserted > 0 {
            tracing::info!(scout = %scout, club = %club, "conversation created");
        }

        self.conn()
            .query_row(
                "SELECT id, scout_id, club_id, created_at, last_activity_at
                 FROM conversations
                 WHERE scout_id = ?1 AND club_id = ?2",
                params![scout.to_string(), club.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, scout_id, club_id, created_at, last_activity_at
                 FROM conversations
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    /// Resolve which side of the conversation `user` is on.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) for an
    /// unknown conversation and `None` for a non-participant.
    pub fn participant_role(&self, id: ConversationId, user: UserId) -> Result<Option<Role>> {
        let conversation = self.get_conversation(id)?;
        if conversation.scout_id == user {
            return Ok(Some(Role::Scout));
        }
        if self.is_club_admin(conversation.club_id, user)? {
            return Ok(Some(Role::AcademyAdmin));
        }
        Ok(None)
    }

    /// The viewer's inbox, most recent activity first.
    pub fn list_conversations(&self, viewer: UserId, role: Role) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(DIRECTORY_SQL)?;
        let rows = stmt.query_map(params![viewer.to_string(), role_tag(role)], |row| {
            let kind: Option<String> = row.get(4)?;
            let content: Option<String> = row.get(5)?;
            let file_name: Option<String> = row.get(6)?;
            let sender = col_opt_uuid(row, 7)?;
            let sent_at = col_opt_ts(row, 8)?;

            let last_message = match (kind.as_deref().and_then(MessageKind::parse), sender, sent_at) {
                (Some(kind), Some(sender), Some(created_at)) => Some(LastMessagePreview {
                    kind,
                    preview: match kind {
                        MessageKind::Text | MessageKind::System => content,
                        MessageKind::File => file_name,
                        MessageKind::PlayerReference => None,
                    },
                    sender_id: UserId(sender),
                    created_at,
                }),
                _ => None,
            };

            Ok(ConversationSummary {
                conversation_id: ConversationId(col_uuid(row, 0)?),
                last_activity_at: col_ts(row, 1)?,
                counterpart_id: col_uuid(row, 2)?,
                counterpart_name: row.get(3)?,
                last_message,
                unread_count: row.get(9)?,
                blocked: row.get(10)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(col_uuid(row, 0)?),
        scout_id: UserId(col_uuid(row, 1)?),
        club_id: ClubId(col_uuid(row, 2)?),
        created_at: col_ts(row, 3)?,
        last_activity_at: col_ts(row, 4)?,
    })
}
