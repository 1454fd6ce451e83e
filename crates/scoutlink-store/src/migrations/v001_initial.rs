//! v001 -- Initial schema creation.
//!
//! Creates the participant tables (`users`, `clubs`, `club_admins`), which
//! mirror data owned by the catalog and auth services, plus `conversations`
//! and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (scouts and academy administrators)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL                -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Clubs (academies)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS clubs (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS club_admins (
    club_id TEXT NOT NULL,                    -- FK -> clubs(id)
    user_id TEXT NOT NULL,                    -- FK -> users(id)

    PRIMARY KEY (club_id, user_id),
    FOREIGN KEY (club_id) REFERENCES clubs(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_club_admins_user ON club_admins(user_id);

-- ----------------------------------------------------------------
-- Conversations: one per (scout, club) pair
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    scout_id         TEXT NOT NULL,               -- FK -> users(id)
    club_id          TEXT NOT NULL,               -- FK -> clubs(id)
    created_at       TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,

    UNIQUE (scout_id, club_id),
    FOREIGN KEY (scout_id) REFERENCES users(id),
    FOREIGN KEY (club_id) REFERENCES clubs(id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_club ON conversations(club_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    conversation_id TEXT NOT NULL,                -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,                -- FK -> users(id)
    type            TEXT NOT NULL
                    CHECK (type IN ('text', 'file', 'player_reference', 'system')),
    content         TEXT,                         -- text / system only
    file_url        TEXT,                         -- file only
    file_name       TEXT,
    file_mime_type  TEXT,
    file_size       INTEGER,
    player_id       TEXT,                         -- player_reference only
    read_at         TEXT,                         -- NULL until read
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id),
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_order
    ON messages(conversation_id, created_at DESC, id DESC);

CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(conversation_id, read_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
