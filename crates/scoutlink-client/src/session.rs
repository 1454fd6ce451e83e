//! One open conversation thread.
//!
//! A [`ThreadHandle`] owns a session task that serialises everything that
//! touches the thread: UI commands, realtime events (one at a time), and the
//! completions of the REST calls it spawns.  The UI reads
//! [`ThreadSnapshot`]s from a watch channel and never mutates state itself.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use scoutlink_shared::message::timestamp_now;
use scoutlink_shared::protocol::{
    AttachmentUpload, BlockState, MarkReadResponse, MessagePage, RealtimeEvent, SendMessageRequest,
};
use scoutlink_shared::{
    ConnectionState, ConversationId, ErrorKind, Message, MessageId, MessagePayload, Role, UserId,
};

use crate::api::MessageApi;
use crate::bridge::{self, BridgeEvent};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::moderation::ModerationGate;
use crate::reconciler::{ConfirmOutcome, Entry, InsertOutcome, LoadState, Reconciler, TempId};
use crate::viewport::{Viewport, ViewportAction};

#[derive(Debug, Clone, Copy)]
pub struct ThreadParams {
    pub conversation_id: ConversationId,
    pub viewer: UserId,
    pub role: Role,
}

#[derive(Debug)]
pub enum ThreadCommand {
    Send(MessagePayload),
    /// Upload, then send a file message pointing at the stored object.
    SendFile {
        name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    },
    Retry(TempId),
    LoadOlder,
    /// Retry the first page after it failed.
    Reload,
    MarkRead,
    SetNearBottom(bool),
    ToggleBlock,
    DismissNotice,
    Close,
}

/// The "load older" control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OlderState {
    Idle,
    Loading,
    Retryable(ErrorKind),
    Exhausted,
}

/// Inline, auto-dismissed error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: ErrorKind,
    pub message: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub entries: Vec<Entry>,
    pub load: LoadState,
    pub load_error: Option<ErrorKind>,
    pub older: OlderState,
    /// `None` until the realtime channel reports for the first time.
    pub connection: Option<ConnectionState>,
    pub notice: Option<Notice>,
    pub blocked: bool,
    pub blocked_by_me: bool,
    pub can_toggle_block: bool,
    /// "N new messages" badge.
    pub unseen: u32,
}

impl ThreadSnapshot {
    fn initial(can_toggle_block: bool) -> Self {
        Self {
            entries: Vec::new(),
            load: LoadState::Loading,
            load_error: None,
            older: OlderState::Idle,
            connection: None,
            notice: None,
            blocked: false,
            blocked_by_me: false,
            can_toggle_block,
            unseen: 0,
        }
    }
}

enum Completion {
    Page {
        refetch: bool,
        result: Result<MessagePage, ClientError>,
    },
    Older(Result<MessagePage, ClientError>),
    Sent {
        temp_id: TempId,
        result: Result<Message, ClientError>,
    },
    Uploaded(Result<AttachmentUpload, ClientError>),
    Read(Result<MarkReadResponse, ClientError>),
    Block(Result<BlockState, ClientError>),
}

async fn timed<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    tokio::time::timeout(limit, request).await?
}

/// Page backwards from the newest message until a page overlaps `known`,
/// so a gap longer than one page is filled completely.  Pages are returned
/// as one list in ascending order.
async fn fetch_gap(
    api: &dyn MessageApi,
    conversation: ConversationId,
    page_size: u32,
    limit: Duration,
    known: &HashSet<MessageId>,
) -> Result<MessagePage, ClientError> {
    let mut pages = Vec::new();
    let mut before = None;
    loop {
        let page = timed(limit, api.load_messages(conversation, before, page_size)).await?;
        let reached = known.is_empty() || page.messages.iter().any(|m| known.contains(&m.id));
        let oldest = page.messages.first().map(|m| m.id);
        let has_more = page.has_more;
        pages.push(page.messages);

        match oldest {
            Some(id) if has_more && !reached => before = Some(id),
            _ => {
                debug!(pages = pages.len(), "Refetched newest messages");
                let messages = pages.into_iter().rev().flatten().collect();
                return Ok(MessagePage { messages, has_more });
            }
        }
    }
}

async fn next_bridge_event(events: &mut Option<mpsc::Receiver<BridgeEvent>>) -> Option<BridgeEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct ThreadSession {
    api: Arc<dyn MessageApi>,
    config: ClientConfig,
    params: ThreadParams,
    reconciler: Reconciler,
    gate: ModerationGate,
    viewport: Viewport,
    older: OlderState,
    load_error: Option<ErrorKind>,
    connection: Option<ConnectionState>,
    /// A `Connected` arrived before the first page; refetch once it lands.
    refetch_after_load: bool,
    notice: Option<Notice>,
    tasks: JoinSet<Completion>,
    snapshots: watch::Sender<ThreadSnapshot>,
}

impl ThreadSession {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ThreadCommand>,
        mut events: Option<mpsc::Receiver<BridgeEvent>>,
    ) {
        let conversation = self.params.conversation_id;
        info!(%conversation, "Thread opened");

        self.fetch_newest();
        self.spawn_block_state();
        self.publish();

        loop {
            let notice_deadline = self.notice.as_ref().map(|n| n.expires_at);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(ThreadCommand::Close) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(completion) => self.handle_completion(completion),
                    Err(e) => warn!(%conversation, error = %e, "Request task failed"),
                },
                event = next_bridge_event(&mut events) => match event {
                    Some(event) => self.handle_bridge(event),
                    None => {
                        debug!(%conversation, "Realtime bridge ended");
                        events = None;
                    }
                },
                _ = sleep_until(notice_deadline) => {
                    self.notice = None;
                }
            }

            self.publish();
        }

        self.tasks.abort_all();
        self.reconciler.clear();
        info!(%conversation, "Thread closed");
    }

    fn publish(&self) {
        let snapshot = ThreadSnapshot {
            entries: self.reconciler.entries().to_vec(),
            load: self.reconciler.state(),
            load_error: self.load_error,
            older: self.older,
            connection: self.connection,
            notice: self.notice.clone(),
            blocked: self.gate.is_blocked(),
            blocked_by_me: self.gate.blocked_by_me(),
            can_toggle_block: self.gate.can_toggle(),
            unseen: self.viewport.unseen(),
        };
        self.snapshots.send_replace(snapshot);
    }

    fn show_notice(&mut self, error: &ClientError) {
        let kind = error.kind();
        if !kind.is_user_facing() {
            debug!(%kind, error = %error, "Not surfacing error");
            return;
        }
        self.notice = Some(Notice {
            kind,
            message: error.to_string(),
            expires_at: Instant::now() + self.config.notice_ttl,
        });
    }

    fn handle_command(&mut self, command: ThreadCommand) {
        match command {
            ThreadCommand::Send(payload) => self.send(payload),
            ThreadCommand::SendFile {
                name,
                mime_type,
                data,
            } => self.upload(name, mime_type, data),
            ThreadCommand::Retry(temp_id) => match self.reconciler.take_failed(temp_id) {
                Some(payload) => self.send(payload),
                None => debug!(%temp_id, "Nothing to retry"),
            },
            ThreadCommand::LoadOlder => self.load_older(),
            ThreadCommand::Reload => {
                if self.load_error.is_some() {
                    self.load_error = None;
                    self.fetch_newest();
                }
            }
            ThreadCommand::MarkRead => self.mark_read(),
            ThreadCommand::SetNearBottom(near_bottom) => {
                if self.viewport.set_near_bottom(near_bottom) {
                    self.mark_read();
                }
            }
            ThreadCommand::ToggleBlock => self.toggle_block(),
            ThreadCommand::DismissNotice => self.notice = None,
            ThreadCommand::Close => {}
        }
    }

    fn send(&mut self, payload: MessagePayload) {
        if let Err(e) = self.gate.check_send() {
            self.show_notice(&e);
            return;
        }
        if let Err(e) = payload.validate() {
            self.show_notice(&ClientError::api(ErrorKind::ValidationFailed, e.to_string()));
            return;
        }

        let request = SendMessageRequest::new(self.params.conversation_id, &payload);
        let temp_id = self.reconciler.push_pending(
            self.params.conversation_id,
            self.params.viewer,
            payload,
            timestamp_now(),
        );
        debug!(%temp_id, kind = request.kind.as_str(), "Sending");

        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        self.tasks.spawn(async move {
            let result = timed(limit, api.send_message(request)).await;
            Completion::Sent { temp_id, result }
        });
    }

    fn upload(&mut self, name: String, mime_type: Option<String>, data: Vec<u8>) {
        if let Err(e) = self.gate.check_send() {
            self.show_notice(&e);
            return;
        }
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        self.tasks.spawn(async move {
            let result = timed(
                limit,
                api.upload_attachment(conversation, name, mime_type, data),
            )
            .await;
            Completion::Uploaded(result)
        });
    }

    fn fetch_newest(&mut self) {
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        let page_size = self.config.page_size;
        self.tasks.spawn(async move {
            let result = timed(limit, api.load_messages(conversation, None, page_size)).await;
            Completion::Page {
                refetch: false,
                result,
            }
        });
    }

    /// Catch up on whatever was inserted while no subscription was live.
    fn refetch(&mut self) {
        let known: HashSet<MessageId> = self.reconciler.real_ids().into_iter().collect();
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        let page_size = self.config.page_size;
        self.tasks.spawn(async move {
            let result = fetch_gap(api.as_ref(), conversation, page_size, limit, &known).await;
            Completion::Page {
                refetch: true,
                result,
            }
        });
    }

    fn load_older(&mut self) {
        if self.reconciler.state() != LoadState::Loaded
            || matches!(self.older, OlderState::Loading | OlderState::Exhausted)
        {
            return;
        }
        let Some(cursor) = self.reconciler.oldest_message_id() else {
            self.older = OlderState::Exhausted;
            return;
        };

        self.older = OlderState::Loading;
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        let page_size = self.config.page_size;
        self.tasks.spawn(async move {
            let result = timed(limit, api.load_messages(conversation, Some(cursor), page_size)).await;
            Completion::Older(result)
        });
    }

    fn has_unread(&self) -> bool {
        self.reconciler.entries().iter().any(|e| {
            e.sender_id != self.params.viewer && e.read_at.is_none() && e.message_id().is_some()
        })
    }

    fn mark_read(&mut self) {
        if !self.has_unread() {
            return;
        }
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        self.tasks.spawn(async move {
            Completion::Read(timed(limit, api.mark_read(conversation)).await)
        });
    }

    fn spawn_block_state(&mut self) {
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        self.tasks.spawn(async move {
            Completion::Block(timed(limit, api.block_state(conversation)).await)
        });
    }

    fn toggle_block(&mut self) {
        if !self.gate.can_toggle() {
            self.show_notice(&ClientError::api(
                ErrorKind::Forbidden,
                "Only academy administrators can block a conversation",
            ));
            return;
        }
        let action = self.gate.next_action();
        let api = Arc::clone(&self.api);
        let limit = self.config.request_timeout;
        let conversation = self.params.conversation_id;
        self.tasks.spawn(async move {
            Completion::Block(timed(limit, api.set_block(conversation, action)).await)
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Page {
                refetch: false,
                result,
            } => match result {
                Ok(page) => {
                    self.load_error = None;
                    self.older = if page.has_more {
                        OlderState::Idle
                    } else {
                        OlderState::Exhausted
                    };
                    self.reconciler.load_initial(page);
                    if self.viewport.near_bottom() {
                        self.mark_read();
                    }
                    if std::mem::take(&mut self.refetch_after_load) {
                        self.refetch();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load messages");
                    self.load_error = Some(e.kind());
                    self.show_notice(&e);
                }
            },
            Completion::Page {
                refetch: true,
                result,
            } => match result {
                Ok(page) => {
                    let viewer = self.params.viewer;
                    let remote = page.messages.iter().filter(|m| m.sender_id != viewer).count();
                    for message in &page.messages {
                        self.gate.observe(message);
                    }
                    let appended = self.reconciler.merge_refetch(page, viewer);
                    debug!(appended, "Merged refetch");
                    if self.older == OlderState::Exhausted && self.reconciler.has_more() {
                        self.older = OlderState::Idle;
                    }
                    if appended > 0 && remote > 0 {
                        self.on_remote_appended(appended.min(remote));
                    }
                }
                Err(e) => warn!(error = %e, "Refetch after connect failed"),
            },
            Completion::Older(result) => match result {
                Ok(page) => {
                    self.older = if page.has_more {
                        OlderState::Idle
                    } else {
                        OlderState::Exhausted
                    };
                    let added = self.reconciler.prepend_older(page);
                    debug!(added, "Loaded older messages");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load older messages");
                    self.older = OlderState::Retryable(e.kind());
                }
            },
            Completion::Sent { temp_id, result } => match result {
                Ok(message) => {
                    let id = message.id;
                    match self.reconciler.confirm_pending(temp_id, message) {
                        ConfirmOutcome::Unknown => debug!(%temp_id, "Confirmed an entry that is gone"),
                        outcome => debug!(%temp_id, %id, ?outcome, "Send confirmed"),
                    }
                }
                Err(e) => {
                    let kind = e.kind();
                    if kind == ErrorKind::ConversationBlocked {
                        self.gate.mark_blocked();
                    }
                    if self.reconciler.fail_pending(temp_id, kind) {
                        warn!(%temp_id, %kind, "Send failed");
                        self.show_notice(&e);
                    }
                }
            },
            Completion::Uploaded(result) => match result {
                Ok(upload) => self.send(MessagePayload::File(upload.into())),
                Err(e) => {
                    warn!(error = %e, "Attachment upload failed");
                    if e.kind() == ErrorKind::ConversationBlocked {
                        self.gate.mark_blocked();
                    }
                    self.show_notice(&e);
                }
            },
            Completion::Read(result) => match result {
                Ok(response) => {
                    let changed = self
                        .reconciler
                        .mark_counterpart_read(self.params.viewer, timestamp_now());
                    debug!(updated = response.updated, changed, "Marked read");
                }
                Err(e) => debug!(error = %e, "Mark read failed"),
            },
            Completion::Block(result) => match result {
                Ok(state) => self.gate.update(state),
                Err(e) => {
                    warn!(error = %e, "Block request failed");
                    self.show_notice(&e);
                }
            },
        }
    }

    fn handle_bridge(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::State(state) => {
                debug!(?state, "Realtime state");
                self.connection = Some(state);
                if state == ConnectionState::Connected {
                    if self.reconciler.state() == LoadState::Loaded {
                        self.refetch();
                    } else {
                        self.refetch_after_load = true;
                    }
                }
            }
            BridgeEvent::Event(RealtimeEvent::MessageInserted { message }) => {
                self.gate.observe(&message);
                let remote = message.sender_id != self.params.viewer;
                match self.reconciler.apply_insert(message, self.params.viewer) {
                    InsertOutcome::Appended if remote => self.on_remote_appended(1),
                    InsertOutcome::Promoted(temp_id) => debug!(%temp_id, "Echo promoted pending entry"),
                    _ => {}
                }
            }
            BridgeEvent::Event(RealtimeEvent::MessageUpdated { message }) => {
                self.reconciler.apply_update(message);
            }
        }
    }

    fn on_remote_appended(&mut self, count: usize) {
        let mut follow = false;
        for _ in 0..count {
            if self.viewport.on_remote_appended() == ViewportAction::ScrollAndMarkRead {
                follow = true;
            }
        }
        if follow {
            self.mark_read();
        }
    }
}

/// Owner of an open thread.  Dropping it tears down the session, its
/// realtime subscription, and any request still in flight.
pub struct ThreadHandle {
    commands: mpsc::Sender<ThreadCommand>,
    snapshots: watch::Receiver<ThreadSnapshot>,
    session: JoinHandle<()>,
    bridge: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    /// Open a thread with its own realtime subscription.
    pub fn open(api: Arc<dyn MessageApi>, config: ClientConfig, params: ThreadParams) -> Self {
        let (bridge, events) = bridge::spawn(&config, params.conversation_id, params.viewer);
        Self::start(api, config, params, Some(events), Some(bridge))
    }

    /// Open a thread fed by an external event source.
    pub fn open_with_events(
        api: Arc<dyn MessageApi>,
        config: ClientConfig,
        params: ThreadParams,
        events: mpsc::Receiver<BridgeEvent>,
    ) -> Self {
        Self::start(api, config, params, Some(events), None)
    }

    fn start(
        api: Arc<dyn MessageApi>,
        config: ClientConfig,
        params: ThreadParams,
        events: Option<mpsc::Receiver<BridgeEvent>>,
        bridge: Option<JoinHandle<()>>,
    ) -> Self {
        let gate = ModerationGate::new(params.conversation_id, params.viewer, params.role);
        let (snapshot_tx, snapshots) = watch::channel(ThreadSnapshot::initial(gate.can_toggle()));
        let (commands, command_rx) = mpsc::channel(64);

        let session = ThreadSession {
            api,
            reconciler: Reconciler::new(config.echo_window),
            config,
            params,
            gate,
            viewport: Viewport::default(),
            older: OlderState::Idle,
            load_error: None,
            connection: None,
            refetch_after_load: false,
            notice: None,
            tasks: JoinSet::new(),
            snapshots: snapshot_tx,
        };
        let session = tokio::spawn(session.run(command_rx, events));

        Self {
            commands,
            snapshots,
            session,
            bridge,
        }
    }

    pub async fn command(&self, command: ThreadCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(ThreadCommand::Send(MessagePayload::Text(text.into())))
            .await
    }

    pub async fn send_file(
        &self,
        name: impl Into<String>,
        mime_type: Option<String>,
        data: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.command(ThreadCommand::SendFile {
            name: name.into(),
            mime_type,
            data,
        })
        .await
    }

    pub async fn retry(&self, temp_id: TempId) -> Result<(), ClientError> {
        self.command(ThreadCommand::Retry(temp_id)).await
    }

    pub async fn load_older(&self) -> Result<(), ClientError> {
        self.command(ThreadCommand::LoadOlder).await
    }

    pub async fn set_near_bottom(&self, near_bottom: bool) -> Result<(), ClientError> {
        self.command(ThreadCommand::SetNearBottom(near_bottom)).await
    }

    pub async fn toggle_block(&self) -> Result<(), ClientError> {
        self.command(ThreadCommand::ToggleBlock).await
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThreadSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `ready`.
    pub async fn wait_for(
        &mut self,
        ready: impl FnMut(&ThreadSnapshot) -> bool,
    ) -> Result<ThreadSnapshot, ClientError> {
        let snapshot = self
            .snapshots
            .wait_for(ready)
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(snapshot.clone())
    }

    pub async fn close(self) {
        let _ = self.commands.send(ThreadCommand::Close).await;
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.session.abort();
        if let Some(bridge) = &self.bridge {
            bridge.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use scoutlink_shared::protocol::{BlockAction, BlockRecord, ConversationSummary};
    use scoutlink_shared::MessageId;
    use tokio::sync::Notify;

    use crate::reconciler::{EntryId, EntryStatus};

    struct FakeApi {
        viewer: UserId,
        pages: Mutex<VecDeque<Result<MessagePage, ClientError>>>,
        cursors: Mutex<Vec<Option<MessageId>>>,
        send_failures: Mutex<VecDeque<ClientError>>,
        send_ids: Mutex<VecDeque<MessageId>>,
        block: Mutex<BlockState>,
        hold_sends: Option<Arc<Notify>>,
        hang_sends: bool,
        send_calls: AtomicUsize,
        read_calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(viewer: UserId) -> Self {
            Self {
                viewer,
                pages: Mutex::new(VecDeque::new()),
                cursors: Mutex::new(Vec::new()),
                send_failures: Mutex::new(VecDeque::new()),
                send_ids: Mutex::new(VecDeque::new()),
                block: Mutex::new(BlockState {
                    blocked: false,
                    blocked_by_me: false,
                    blocks: Vec::new(),
                }),
                hold_sends: None,
                hang_sends: false,
                send_calls: AtomicUsize::new(0),
                read_calls: AtomicUsize::new(0),
            }
        }

        fn push_page(&self, page: Result<MessagePage, ClientError>) {
            self.pages.lock().unwrap().push_back(page);
        }

        fn cursors(&self) -> Vec<Option<MessageId>> {
            self.cursors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageApi for FakeApi {
        async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ClientError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_sends {
                std::future::pending::<()>().await;
            }
            if let Some(hold) = &self.hold_sends {
                hold.notified().await;
            }
            if let Some(e) = self.send_failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            let conversation_id = request.conversation_id;
            let payload = request
                .into_payload()
                .map_err(|e| ClientError::api(ErrorKind::ValidationFailed, e.to_string()))?;
            let mut message = Message::new(conversation_id, self.viewer, payload, timestamp_now());
            if let Some(id) = self.send_ids.lock().unwrap().pop_front() {
                message.id = id;
            }
            Ok(message)
        }

        async fn load_messages(
            &self,
            _conversation_id: ConversationId,
            before: Option<MessageId>,
            _limit: u32,
        ) -> Result<MessagePage, ClientError> {
            self.cursors.lock().unwrap().push(before);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(MessagePage::empty()))
        }

        async fn mark_read(
            &self,
            _conversation_id: ConversationId,
        ) -> Result<MarkReadResponse, ClientError> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            Ok(MarkReadResponse { updated: 1 })
        }

        async fn block_state(
            &self,
            _conversation_id: ConversationId,
        ) -> Result<BlockState, ClientError> {
            Ok(self.block.lock().unwrap().clone())
        }

        async fn set_block(
            &self,
            conversation_id: ConversationId,
            action: BlockAction,
        ) -> Result<BlockState, ClientError> {
            let mut state = self.block.lock().unwrap();
            match action {
                BlockAction::Block => state.blocks.push(BlockRecord {
                    conversation_id,
                    blocked_by: self.viewer,
                    created_at: timestamp_now(),
                }),
                BlockAction::Unblock => state.blocks.retain(|b| b.blocked_by != self.viewer),
            }
            state.blocked = !state.blocks.is_empty();
            state.blocked_by_me = state.blocks.iter().any(|b| b.blocked_by == self.viewer);
            Ok(state.clone())
        }

        async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
            Ok(Vec::new())
        }

        async fn upload_attachment(
            &self,
            conversation_id: ConversationId,
            file_name: String,
            mime_type: Option<String>,
            data: Vec<u8>,
        ) -> Result<AttachmentUpload, ClientError> {
            Ok(AttachmentUpload {
                path: format!("{conversation_id}/stored.pdf"),
                name: file_name,
                mime_type: mime_type.unwrap_or_else(|| "application/pdf".into()),
                size: data.len() as u64,
            })
        }
    }

    struct Fixture {
        api: Arc<FakeApi>,
        events: mpsc::Sender<BridgeEvent>,
        handle: ThreadHandle,
        params: ThreadParams,
    }

    fn open(api: FakeApi, role: Role, config: ClientConfig) -> Fixture {
        let params = ThreadParams {
            conversation_id: ConversationId::new(),
            viewer: api.viewer,
            role,
        };
        let api = Arc::new(api);
        let (events, rx) = mpsc::channel(1);
        let handle = ThreadHandle::open_with_events(api.clone(), config, params, rx);
        Fixture {
            api,
            events,
            handle,
            params,
        }
    }

    async fn loaded(fixture: &mut Fixture) {
        fixture
            .handle
            .wait_for(|s| s.load == LoadState::Loaded)
            .await
            .unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn text(content: &str) -> MessagePayload {
        MessagePayload::Text(content.to_string())
    }

    #[tokio::test]
    async fn test_echo_before_response_keeps_one_entry() {
        let viewer = UserId::new();
        let mut api = FakeApi::new(viewer);
        let hold = Arc::new(Notify::new());
        api.hold_sends = Some(hold.clone());
        let m42 = MessageId::new();
        api.send_ids.lock().unwrap().push_back(m42);

        let mut fx = open(api, Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;

        fx.handle.send_text("Hello").await.unwrap();
        let snapshot = fx.handle.wait_for(|s| s.entries.len() == 1).await.unwrap();
        let pending = &snapshot.entries[0];
        assert_eq!(pending.id, EntryId::Temp(TempId(1)));
        assert_eq!(pending.status, EntryStatus::Sending);

        // Offset so the persist response is distinguishable once merged.
        let echo_created_at = pending.created_at + chrono::Duration::seconds(2);
        let echo = Message {
            id: m42,
            conversation_id: fx.params.conversation_id,
            sender_id: viewer,
            payload: text("Hello"),
            read_at: None,
            created_at: echo_created_at,
        };
        fx.events
            .send(BridgeEvent::Event(RealtimeEvent::MessageInserted { message: echo }))
            .await
            .unwrap();
        fx.handle
            .wait_for(|s| s.entries.first().map(|e| e.id) == Some(EntryId::Real(m42)))
            .await
            .unwrap();

        hold.notify_one();
        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.first().is_some_and(|e| e.created_at != echo_created_at))
            .await
            .unwrap();

        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].id, EntryId::Real(m42));
        assert_eq!(snapshot.entries[0].status, EntryStatus::Sent);
        assert_eq!(snapshot.entries[0].payload, text("Hello"));
    }

    #[tokio::test]
    async fn test_failed_send_stays_visible_and_retries() {
        let viewer = UserId::new();
        let api = FakeApi::new(viewer);
        api.send_failures
            .lock()
            .unwrap()
            .push_back(ClientError::Network("connection reset".into()));

        let mut fx = open(api, Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;

        fx.handle.send_text("Are you there?").await.unwrap();
        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.first().is_some_and(Entry::is_failed))
            .await
            .unwrap();
        assert_eq!(
            snapshot.entries[0].status,
            EntryStatus::Failed(ErrorKind::TransientNetwork)
        );
        assert_eq!(snapshot.entries[0].payload, text("Are you there?"));

        fx.handle.retry(TempId(1)).await.unwrap();
        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.first().is_some_and(|e| e.status == EntryStatus::Sent))
            .await
            .unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].temp_id, Some(TempId(2)));
        assert_eq!(snapshot.entries[0].payload, text("Are you there?"));
        assert_eq!(fx.api.send_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blocked_send_makes_no_request() {
        let viewer = UserId::new();
        let api = FakeApi::new(viewer);
        {
            let mut block = api.block.lock().unwrap();
            block.blocked = true;
            block.blocks.push(BlockRecord {
                conversation_id: ConversationId::new(),
                blocked_by: UserId::new(),
                created_at: timestamp_now(),
            });
        }

        let mut fx = open(api, Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;
        fx.handle.wait_for(|s| s.blocked).await.unwrap();

        fx.handle.send_text("Hello").await.unwrap();
        let snapshot = fx.handle.wait_for(|s| s.notice.is_some()).await.unwrap();
        assert_eq!(
            snapshot.notice.map(|n| n.kind),
            Some(ErrorKind::ConversationBlocked)
        );
        assert!(snapshot.entries.is_empty());
        assert!(!snapshot.can_toggle_block);
        assert_eq!(fx.api.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notice_expires() {
        let api = FakeApi::new(UserId::new());
        let mut config = ClientConfig::default();
        config.notice_ttl = Duration::from_millis(20);

        let mut fx = open(api, Role::Scout, config);
        loaded(&mut fx).await;

        fx.handle.toggle_block().await.unwrap();
        let snapshot = fx.handle.wait_for(|s| s.notice.is_some()).await.unwrap();
        assert_eq!(snapshot.notice.map(|n| n.kind), Some(ErrorKind::Forbidden));
        fx.handle.wait_for(|s| s.notice.is_none()).await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_send_fails() {
        let mut api = FakeApi::new(UserId::new());
        api.hang_sends = true;
        let mut config = ClientConfig::default();
        config.request_timeout = Duration::from_millis(30);

        let mut fx = open(api, Role::Scout, config);
        loaded(&mut fx).await;

        fx.handle.send_text("Hello").await.unwrap();
        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.first().is_some_and(Entry::is_failed))
            .await
            .unwrap();
        assert_eq!(
            snapshot.entries[0].status,
            EntryStatus::Failed(ErrorKind::TransientNetwork)
        );
        assert!(snapshot.notice.is_none());
    }

    #[tokio::test]
    async fn test_remote_message_badge_and_mark_read() {
        let mut fx = open(FakeApi::new(UserId::new()), Role::AcademyAdmin, ClientConfig::default());
        loaded(&mut fx).await;

        fx.handle.set_near_bottom(false).await.unwrap();
        let remote = Message::new(
            fx.params.conversation_id,
            UserId::new(),
            text("New report"),
            timestamp_now(),
        );
        fx.events
            .send(BridgeEvent::Event(RealtimeEvent::MessageInserted { message: remote }))
            .await
            .unwrap();
        let snapshot = fx.handle.wait_for(|s| s.unseen == 1).await.unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(fx.api.read_calls.load(Ordering::SeqCst), 0);

        fx.handle.set_near_bottom(true).await.unwrap();
        fx.handle.wait_for(|s| s.unseen == 0).await.unwrap();
        let api = fx.api.clone();
        eventually(|| api.read_calls.load(Ordering::SeqCst) == 1).await;
        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.iter().all(|e| e.read_at.is_some()))
            .await
            .unwrap();
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_older_page_failure_is_retryable() {
        let viewer = UserId::new();
        let conversation = ConversationId::new();
        let older = Message::new(conversation, UserId::new(), text("older"), timestamp_now());
        let newest = Message::new(conversation, UserId::new(), text("newest"), timestamp_now());

        let api = FakeApi::new(viewer);
        api.push_page(Ok(MessagePage {
            messages: vec![newest.clone()],
            has_more: true,
        }));
        api.push_page(Err(ClientError::Timeout));
        api.push_page(Ok(MessagePage {
            messages: vec![older.clone()],
            has_more: false,
        }));

        let mut fx = open(api, Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;

        fx.handle.load_older().await.unwrap();
        let snapshot = fx
            .handle
            .wait_for(|s| matches!(s.older, OlderState::Retryable(_)))
            .await
            .unwrap();
        assert_eq!(snapshot.older, OlderState::Retryable(ErrorKind::TransientNetwork));
        assert_eq!(snapshot.entries.len(), 1);

        fx.handle.load_older().await.unwrap();
        let snapshot = fx
            .handle
            .wait_for(|s| s.older == OlderState::Exhausted)
            .await
            .unwrap();
        let ids: Vec<_> = snapshot.entries.iter().filter_map(Entry::message_id).collect();
        assert_eq!(ids, vec![older.id, newest.id]);
    }

    #[tokio::test]
    async fn test_reconnect_refetches_missed_messages() {
        let mut fx = open(FakeApi::new(UserId::new()), Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;

        fx.events
            .send(BridgeEvent::State(ConnectionState::Connected))
            .await
            .unwrap();
        fx.handle
            .wait_for(|s| s.connection == Some(ConnectionState::Connected))
            .await
            .unwrap();
        let api = fx.api.clone();
        eventually(|| api.cursors().len() == 2).await;

        let missed = Message::new(
            fx.params.conversation_id,
            UserId::new(),
            text("sent while offline"),
            timestamp_now(),
        );
        fx.api.push_page(Ok(MessagePage {
            messages: vec![missed.clone()],
            has_more: false,
        }));
        fx.events
            .send(BridgeEvent::State(ConnectionState::Reconnecting))
            .await
            .unwrap();
        fx.handle
            .wait_for(|s| s.connection == Some(ConnectionState::Reconnecting))
            .await
            .unwrap();
        fx.events
            .send(BridgeEvent::State(ConnectionState::Connected))
            .await
            .unwrap();

        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.len() == 1)
            .await
            .unwrap();
        assert_eq!(snapshot.entries[0].message_id(), Some(missed.id));
        assert_eq!(snapshot.connection, Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_first_connect_catches_up_after_initial_page() {
        let mut fx = open(FakeApi::new(UserId::new()), Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;

        // Inserted after the first page was read, before the socket was up.
        let between = Message::new(
            fx.params.conversation_id,
            UserId::new(),
            text("sent while subscribing"),
            timestamp_now(),
        );
        fx.api.push_page(Ok(MessagePage {
            messages: vec![between.clone()],
            has_more: false,
        }));
        fx.events
            .send(BridgeEvent::State(ConnectionState::Connected))
            .await
            .unwrap();

        let snapshot = fx.handle.wait_for(|s| s.entries.len() == 1).await.unwrap();
        assert_eq!(snapshot.entries[0].message_id(), Some(between.id));
    }

    #[tokio::test]
    async fn test_connect_before_first_page_refetches_once_loaded() {
        let conversation = ConversationId::new();
        let first = Message::new(conversation, UserId::new(), text("first"), timestamp_now());
        let second = Message::new(conversation, UserId::new(), text("second"), timestamp_now());

        let api = FakeApi::new(UserId::new());
        api.push_page(Err(ClientError::Timeout));
        let mut fx = open(api, Role::Scout, ClientConfig::default());
        fx.handle.wait_for(|s| s.load_error.is_some()).await.unwrap();

        fx.events
            .send(BridgeEvent::State(ConnectionState::Connected))
            .await
            .unwrap();
        fx.handle
            .wait_for(|s| s.connection == Some(ConnectionState::Connected))
            .await
            .unwrap();
        assert_eq!(fx.api.cursors().len(), 1);

        fx.api.push_page(Ok(MessagePage {
            messages: vec![first.clone()],
            has_more: false,
        }));
        fx.api.push_page(Ok(MessagePage {
            messages: vec![first.clone(), second.clone()],
            has_more: false,
        }));
        fx.handle.command(ThreadCommand::Reload).await.unwrap();

        let snapshot = fx.handle.wait_for(|s| s.entries.len() == 2).await.unwrap();
        let ids: Vec<_> = snapshot.entries.iter().filter_map(Entry::message_id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(fx.api.cursors().len(), 3);
    }

    #[tokio::test]
    async fn test_reconnect_fills_gap_longer_than_a_page() {
        let conversation = ConversationId::new();
        let them = UserId::new();
        let at = |secs: i64| timestamp_now() + chrono::Duration::seconds(secs);
        let old = Message::new(conversation, them, text("old"), at(0));
        let missed: Vec<Message> = (1..=3)
            .map(|i| Message::new(conversation, them, text(&format!("missed {i}")), at(i)))
            .collect();

        let api = FakeApi::new(UserId::new());
        api.push_page(Ok(MessagePage {
            messages: vec![old.clone()],
            has_more: false,
        }));
        let mut config = ClientConfig::default();
        config.page_size = 2;
        let mut fx = open(api, Role::Scout, config);
        loaded(&mut fx).await;

        fx.events
            .send(BridgeEvent::State(ConnectionState::Connected))
            .await
            .unwrap();
        let api = fx.api.clone();
        eventually(|| api.cursors().len() == 2).await;

        // Newest page first, then the one that reaches back to `old`.
        fx.api.push_page(Ok(MessagePage {
            messages: vec![missed[1].clone(), missed[2].clone()],
            has_more: true,
        }));
        fx.api.push_page(Ok(MessagePage {
            messages: vec![old.clone(), missed[0].clone()],
            has_more: true,
        }));
        fx.events
            .send(BridgeEvent::State(ConnectionState::Reconnecting))
            .await
            .unwrap();
        fx.events
            .send(BridgeEvent::State(ConnectionState::Connected))
            .await
            .unwrap();

        let snapshot = fx.handle.wait_for(|s| s.entries.len() == 4).await.unwrap();
        let ids: Vec<_> = snapshot.entries.iter().filter_map(Entry::message_id).collect();
        assert_eq!(ids, vec![old.id, missed[0].id, missed[1].id, missed[2].id]);
        assert_eq!(
            fx.api.cursors()[2..],
            [None, Some(missed[1].id)]
        );
    }

    #[tokio::test]
    async fn test_block_toggle_and_system_echo() {
        let admin = UserId::new();
        let mut fx = open(FakeApi::new(admin), Role::AcademyAdmin, ClientConfig::default());
        loaded(&mut fx).await;

        fx.handle.toggle_block().await.unwrap();
        let snapshot = fx.handle.wait_for(|s| s.blocked).await.unwrap();
        assert!(snapshot.blocked_by_me);

        let unblocked = Message::new(
            fx.params.conversation_id,
            admin,
            MessagePayload::System(scoutlink_shared::constants::SYSTEM_KEY_UNBLOCKED.into()),
            timestamp_now(),
        );
        fx.events
            .send(BridgeEvent::Event(RealtimeEvent::MessageInserted { message: unblocked }))
            .await
            .unwrap();
        let snapshot = fx.handle.wait_for(|s| !s.blocked).await.unwrap();
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_file_send_uploads_then_sends() {
        let mut fx = open(FakeApi::new(UserId::new()), Role::Scout, ClientConfig::default());
        loaded(&mut fx).await;

        fx.handle
            .send_file("report.pdf", Some("application/pdf".into()), vec![1, 2, 3])
            .await
            .unwrap();
        let snapshot = fx
            .handle
            .wait_for(|s| s.entries.first().is_some_and(|e| e.status == EntryStatus::Sent))
            .await
            .unwrap();
        match &snapshot.entries[0].payload {
            MessagePayload::File(file) => {
                assert_eq!(file.name, "report.pdf");
                assert_eq!(file.size, 3);
                assert!(file.url.ends_with("/stored.pdf"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
