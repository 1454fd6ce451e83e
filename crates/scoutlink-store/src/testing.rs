//! Shared fixtures for the store's unit tests.

use scoutlink_shared::message::timestamp_now;
use scoutlink_shared::protocol::Conversation;
use scoutlink_shared::{ClubId, MessagePayload, UserId};

use crate::database::Database;
use crate::models::{Club, User};

pub fn test_db() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("test.db")).expect("should open");
    (db, dir)
}

/// One scout, one club with one admin, and their conversation.
pub struct Fixture {
    pub db: Database,
    pub scout: UserId,
    pub admin: UserId,
    pub club: ClubId,
    pub conversation: Conversation,
    _dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let (db, dir) = test_db();
        let scout = seed_user(&db, "Scout Sam");
        let admin = seed_user(&db, "Admin Alex");
        let club = ClubId::new();
        db.upsert_club(&Club {
            id: club,
            name: "River Academy".into(),
            created_at: timestamp_now(),
        })
        .unwrap();
        db.add_club_admin(club, admin).unwrap();
        let conversation = db.get_or_create_conversation(scout, club).unwrap();

        Self {
            db,
            scout,
            admin,
            club,
            conversation,
            _dir: dir,
        }
    }

    pub fn text(&self, sender: UserId, content: &str) -> scoutlink_shared::Message {
        self.db
            .insert_message(
                self.conversation.id,
                sender,
                &MessagePayload::Text(content.to_string()),
            )
            .unwrap()
    }
}

pub fn seed_user(db: &Database, name: &str) -> UserId {
    let id = UserId::new();
    db.upsert_user(&User {
        id,
        display_name: name.to_string(),
        created_at: timestamp_now(),
    })
    .unwrap();
    id
}
