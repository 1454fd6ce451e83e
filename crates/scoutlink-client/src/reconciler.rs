//! The ordered message list of one open thread.
//!
//! Three sources feed it: history pages, this session's own sends, and
//! realtime events.  The reconciler merges them without ever reordering what
//! is already shown, and guarantees that no two entries carry the same
//! server id.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use scoutlink_shared::protocol::MessagePage;
use scoutlink_shared::{
    ConversationId, ErrorKind, FileMeta, Message, MessageId, MessagePayload, UserId,
};

/// Locally generated id of an optimistic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u64);

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "temp-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    Temp(TempId),
    Real(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Came from the server: history, a refetch, or the other party.
    Confirmed,
    /// Sent from this session, waiting for the server.
    Sending,
    /// Sent from this session and acknowledged.
    Sent,
    /// Sent from this session and rejected; kept for retry.
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    /// Set on entries created by this session's send pipeline.
    pub temp_id: Option<TempId>,
    pub status: EntryStatus,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub payload: MessagePayload,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    fn confirmed(message: Message) -> Self {
        Self {
            id: EntryId::Real(message.id),
            temp_id: None,
            status: EntryStatus::Confirmed,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            payload: message.payload,
            read_at: message.read_at,
            created_at: message.created_at,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self.id {
            EntryId::Real(id) => Some(id),
            EntryId::Temp(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Sending
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, EntryStatus::Failed(_))
    }

    fn adopt(&mut self, message: Message) {
        self.id = EntryId::Real(message.id);
        self.status = EntryStatus::Sent;
        self.payload = message.payload;
        self.read_at = message.read_at;
        self.created_at = message.created_at;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
}

/// How an inserted message was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The echo of one of our pending sends; that entry now carries the id.
    Promoted(TempId),
    /// Already shown.
    Duplicate,
    /// A new entry at the tail.
    Appended,
}

/// How a persist response was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Promoted,
    /// An echo had already promoted this entry.
    AlreadyPromoted,
    /// The id was already shown as a separate entry; the pending one was
    /// dropped.
    Dropped,
    /// An echo had given the id to another of our entries; ids were swapped.
    Swapped,
    /// No such pending entry.
    Unknown,
}

/// Two payloads are the same send if they are equal, or if they describe the
/// same attachment and one url is the signed form of the other.
fn payload_matches(pending: &MessagePayload, echoed: &MessagePayload) -> bool {
    match (pending, echoed) {
        (MessagePayload::File(a), MessagePayload::File(b)) => same_attachment(a, b),
        _ => pending == echoed,
    }
}

fn same_attachment(a: &FileMeta, b: &FileMeta) -> bool {
    if a.name != b.name || a.mime_type != b.mime_type || a.size != b.size {
        return false;
    }
    if a.url == b.url {
        return true;
    }
    let strip = |url: &str| url.split('?').next().unwrap_or(url).to_string();
    let (a_url, b_url) = (strip(&a.url), strip(&b.url));
    a_url.ends_with(&format!("/attachments/{b_url}"))
        || b_url.ends_with(&format!("/attachments/{a_url}"))
}

pub struct Reconciler {
    entries: Vec<Entry>,
    state: LoadState,
    has_more: bool,
    next_temp: u64,
    echo_window: chrono::Duration,
}

impl Reconciler {
    pub fn new(echo_window: chrono::Duration) -> Self {
        Self {
            entries: Vec::new(),
            state: LoadState::Loading,
            has_more: false,
            next_temp: 1,
            echo_window,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn entry(&self, temp_id: TempId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.temp_id == Some(temp_id))
    }

    /// Cursor for the next older page: the first entry that has a server id.
    pub fn oldest_message_id(&self) -> Option<MessageId> {
        self.entries.iter().find_map(Entry::message_id)
    }

    pub fn real_ids(&self) -> Vec<MessageId> {
        self.entries.iter().filter_map(Entry::message_id).collect()
    }

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == EntryId::Real(id))
    }

    fn position_of_temp(&self, temp_id: TempId) -> Option<usize> {
        self.entries.iter().position(|e| e.temp_id == Some(temp_id))
    }

    /// Replace history with the newest page.  Local entries the page does not
    /// cover stay at the tail.
    pub fn load_initial(&mut self, page: MessagePage) {
        let page_ids: HashSet<MessageId> = page.messages.iter().map(|m| m.id).collect();
        let kept: Vec<Entry> = self
            .entries
            .drain(..)
            .filter(|e| {
                e.temp_id.is_some() && e.message_id().map_or(true, |id| !page_ids.contains(&id))
            })
            .collect();

        self.entries = page.messages.into_iter().map(Entry::confirmed).collect();
        self.entries.extend(kept);
        self.has_more = page.has_more;
        self.state = LoadState::Loaded;
    }

    /// Insert an older page at the head.  Returns how many entries were added.
    pub fn prepend_older(&mut self, page: MessagePage) -> usize {
        let older: Vec<Entry> = page
            .messages
            .into_iter()
            .filter(|m| !self.contains(m.id))
            .map(Entry::confirmed)
            .collect();
        let added = older.len();
        self.entries.splice(0..0, older);
        self.has_more = page.has_more;
        added
    }

    /// Append an optimistic entry for a send that is about to start.
    pub fn push_pending(
        &mut self,
        conversation_id: ConversationId,
        sender_id: UserId,
        payload: MessagePayload,
        created_at: DateTime<Utc>,
    ) -> TempId {
        let temp_id = TempId(self.next_temp);
        self.next_temp += 1;
        self.entries.push(Entry {
            id: EntryId::Temp(temp_id),
            temp_id: Some(temp_id),
            status: EntryStatus::Sending,
            conversation_id,
            sender_id,
            payload,
            read_at: None,
            created_at,
        });
        temp_id
    }

    /// Apply the persist response of `temp_id`.
    pub fn confirm_pending(&mut self, temp_id: TempId, message: Message) -> ConfirmOutcome {
        let Some(index) = self.position_of_temp(temp_id) else {
            return ConfirmOutcome::Unknown;
        };

        if self.entries[index].id == EntryId::Real(message.id) {
            self.entries[index].adopt(message);
            return ConfirmOutcome::AlreadyPromoted;
        }

        match self.position_of(message.id) {
            Some(holder) if self.entries[holder].temp_id.is_some() => {
                // An echo promoted the wrong one of two identical sends.  The
                // holder takes whatever id this entry had, or falls back to
                // its own temp id and keeps waiting.
                let displaced = self.entries[index].id;
                let holder_entry = &mut self.entries[holder];
                match (displaced, holder_entry.temp_id) {
                    (EntryId::Real(id), _) => {
                        holder_entry.id = EntryId::Real(id);
                        holder_entry.status = EntryStatus::Sent;
                    }
                    (EntryId::Temp(_), Some(own)) => {
                        holder_entry.id = EntryId::Temp(own);
                        holder_entry.status = EntryStatus::Sending;
                    }
                    (EntryId::Temp(_), None) => {}
                }
                self.entries[index].adopt(message);
                ConfirmOutcome::Swapped
            }
            Some(_) => {
                self.entries.remove(index);
                ConfirmOutcome::Dropped
            }
            None => {
                self.entries[index].adopt(message);
                ConfirmOutcome::Promoted
            }
        }
    }

    /// Mark a send as failed.  Ignored when the entry was already confirmed
    /// by its echo, since the server has the message.
    pub fn fail_pending(&mut self, temp_id: TempId, kind: ErrorKind) -> bool {
        match self.position_of_temp(temp_id) {
            Some(index) if self.entries[index].is_pending() => {
                self.entries[index].status = EntryStatus::Failed(kind);
                true
            }
            _ => false,
        }
    }

    /// Remove a failed entry and hand back its payload for a new attempt.
    pub fn take_failed(&mut self, temp_id: TempId) -> Option<MessagePayload> {
        let index = self.position_of_temp(temp_id)?;
        if !self.entries[index].is_failed() {
            return None;
        }
        Some(self.entries.remove(index).payload)
    }

    /// Merge a `message_inserted` event.
    pub fn apply_insert(&mut self, message: Message, viewer: UserId) -> InsertOutcome {
        if self.contains(message.id) {
            return InsertOutcome::Duplicate;
        }

        if message.sender_id == viewer {
            let window = self.echo_window;
            let candidate = self.entries.iter().enumerate().rev().find_map(|(index, e)| {
                let delta = message.created_at - e.created_at;
                let matches = e.is_pending()
                    && e.sender_id == message.sender_id
                    && payload_matches(&e.payload, &message.payload)
                    && delta <= window
                    && delta >= -window;
                match (matches, e.temp_id) {
                    (true, Some(temp_id)) => Some((index, temp_id)),
                    _ => None,
                }
            });
            if let Some((index, temp_id)) = candidate {
                self.entries[index].adopt(message);
                return InsertOutcome::Promoted(temp_id);
            }
        }

        self.entries.push(Entry::confirmed(message));
        InsertOutcome::Appended
    }

    /// Merge a `message_updated` event: only the read timestamp changes.
    pub fn apply_update(&mut self, message: Message) -> bool {
        match self.position_of(message.id) {
            Some(index) => {
                self.entries[index].read_at = message.read_at;
                true
            }
            None => false,
        }
    }

    /// Merge the pages fetched after a (re)connect, oldest first.  Returns
    /// how many entries were appended.
    pub fn merge_refetch(&mut self, page: MessagePage, viewer: UserId) -> usize {
        if self.oldest_message_id().is_none() {
            self.has_more = page.has_more;
        }
        page.messages
            .into_iter()
            .map(|m| self.apply_insert(m, viewer))
            .filter(|outcome| *outcome == InsertOutcome::Appended)
            .count()
    }

    /// Locally mark the counterpart's messages as read.
    pub fn mark_counterpart_read(&mut self, viewer: UserId, at: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.sender_id != viewer && entry.read_at.is_none() && entry.message_id().is_some() {
                entry.read_at = Some(at);
                changed += 1;
            }
        }
        changed
    }

    /// Drop everything, as when the thread is closed.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.has_more = false;
        self.state = LoadState::Loading;
    }
}
