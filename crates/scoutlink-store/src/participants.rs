//! Participant records mirrored from the catalog and auth services.

use rusqlite::params;

use scoutlink_shared::{ClubId, UserId};

use crate::database::{col_ts, col_uuid, encode_ts, Database};
use crate::error::{not_found, Result};
use crate::models::{Club, User};

impl Database {
    /// Insert or refresh a user.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![
                user.id.to_string(),
                user.display_name,
                encode_ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(User {
                        id: UserId(col_uuid(row, 0)?),
                        display_name: row.get(1)?,
                        created_at: col_ts(row, 2)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Insert or refresh a club.
    pub fn upsert_club(&self, club: &Club) -> Result<()> {
        self.conn().execute(
            "INSERT INTO clubs (id, name, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![club.id.to_string(), club.name, encode_ts(&club.created_at)],
        )?;
        Ok(())
    }

    pub fn get_club(&self, id: ClubId) -> Result<Club> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM clubs WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(Club {
                        id: ClubId(col_uuid(row, 0)?),
                        name: row.get(1)?,
                        created_at: col_ts(row, 2)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Grant `user` administrator rights over `club`.  Idempotent.
    pub fn add_club_admin(&self, club: ClubId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO club_admins (club_id, user_id) VALUES (?1, ?2)",
            params![club.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    pub fn is_club_admin(&self, club: ClubId, user: UserId) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM club_admins WHERE club_id = ?1 AND user_id = ?2)",
            params![club.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Whether `user` administers at least one club.
    pub fn administers_any_club(&self, user: UserId) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM club_admins WHERE user_id = ?1)",
            params![user.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
