//! Participant records.
//!
//! Users and clubs are owned by the catalog and auth services; the store
//! keeps the subset the messaging queries join against.  Conversation,
//! message and block shapes live in `scoutlink-shared` because the client
//! speaks them too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scoutlink_shared::{ClubId, UserId};

pub use scoutlink_shared::protocol::{BlockRecord, BlockState, Conversation, ConversationSummary};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A scout or academy administrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Name shown to the counterpart in the inbox.
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Club
// ---------------------------------------------------------------------------

/// An academy.  Its administrators are listed in `club_admins`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Club {
    pub id: ClubId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
