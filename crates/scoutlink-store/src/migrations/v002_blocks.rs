use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Soft-delete marker; flagged rows are invisible to every read
ALTER TABLE messages ADD COLUMN deleted_at TEXT;

-- At most one block per imposing party
CREATE TABLE IF NOT EXISTS conversation_blocks (
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    blocked_by      TEXT NOT NULL,              -- FK -> users(id)
    created_at      TEXT NOT NULL,

    PRIMARY KEY (conversation_id, blocked_by),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (blocked_by) REFERENCES users(id)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
