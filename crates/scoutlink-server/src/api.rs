use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use scoutlink_shared::constants::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, SYSTEM_KEY_BLOCKED, SYSTEM_KEY_UNBLOCKED,
};
use scoutlink_shared::protocol::{
    AttachmentUpload, BlockAction, BlockRequest, BlockState, Conversation,
    ConversationSummary, CreateConversationRequest, MarkReadResponse, MessagePage,
    RealtimeEvent, SendMessageRequest,
};
use scoutlink_shared::{ConversationId, Message, MessageId, MessagePayload, Role, UserId};
use scoutlink_store::{Database, StoreError};

use crate::attachments::{mime_for_extension, AttachmentStore};
use crate::auth::Viewer;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, MessageQuota, RateLimiter};
use crate::realtime::{self, RealtimeHub};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub attachments: Arc<AttachmentStore>,
    pub hub: RealtimeHub,
    pub rate_limiter: RateLimiter,
    pub quota: MessageQuota,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database, attachments: AttachmentStore) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            attachments: Arc::new(attachments),
            hub: RealtimeHub::new(),
            rate_limiter: RateLimiter::default(),
            quota: MessageQuota::new(config.hourly_message_quota, config.quota_window),
            config: Arc::new(config),
        }
    }

    /// Lock the database.  Never hold the guard across an `.await`.
    fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".into()))
    }

    /// Replace stored attachment paths with signed download links.
    fn present(&self, mut message: Message) -> Message {
        if let MessagePayload::File(file) = &mut message.payload {
            if !file.has_absolute_url() {
                file.url = self.attachments.signed_url(&file.url, Utc::now());
            }
        }
        message
    }

    fn publish(&self, event: RealtimeEvent) {
        let reached = self.hub.publish(event);
        tracing::trace!(reached, "Realtime event published");
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(Any);

    // Leave headroom for multipart framing; the upload handler enforces the
    // exact cap itself.
    let body_limit = state.config.max_attachment_size + 1024 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/messages", post(send_message).get(list_messages))
        .route("/messages/:conversation_id/read", patch(mark_read))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/:conversation_id/block",
            get(block_state).post(set_block),
        )
        .route("/attachments", post(upload_attachment))
        .route(
            "/attachments/:conversation_id/:file",
            get(download_attachment),
        )
        .route("/realtime/:conversation_id", get(realtime_socket))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The viewer's side of the conversation.  Unknown conversations and
/// outsiders are indistinguishable to the caller.
fn require_participant(
    db: &Database,
    conversation_id: ConversationId,
    viewer: UserId,
) -> Result<Role, ServerError> {
    match db.participant_role(conversation_id, viewer) {
        Ok(Some(role)) => Ok(role),
        Ok(None) | Err(StoreError::NotFound) => Err(ServerError::NotParticipant),
        Err(e) => Err(e.into()),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Messages ───

async fn send_message(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let Json(request) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let conversation_id = request.conversation_id;

    {
        let db = state.db()?;
        require_participant(&db, conversation_id, viewer)?;
        if db.is_blocked(conversation_id)? {
            return Err(ServerError::ConversationBlocked);
        }
    }

    let payload = request.into_payload()?;
    if let MessagePayload::File(file) = &payload {
        if !file.has_absolute_url() && !AttachmentStore::belongs_to(&file.url, conversation_id) {
            return Err(ServerError::BadRequest(
                "Attachment does not belong to this conversation".into(),
            ));
        }
    }

    if !state.quota.check(conversation_id, viewer).await {
        warn!(conversation = %conversation_id, sender = %viewer, "Message quota exceeded");
        return Err(ServerError::RateLimited);
    }

    let stored = state
        .db()
        .and_then(|db| Ok(db.insert_message(conversation_id, viewer, &payload)?));
    let message = match stored {
        Ok(message) => state.present(message),
        Err(e) => {
            state.quota.release(conversation_id, viewer).await;
            return Err(e);
        }
    };
    info!(
        conversation = %conversation_id,
        id = %message.id,
        kind = message.kind().as_str(),
        "Message stored"
    );

    state.publish(RealtimeEvent::MessageInserted {
        message: message.clone(),
    });
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Deserialize)]
struct MessagesQuery {
    conversation_id: ConversationId,
    before: Option<MessageId>,
    limit: Option<u32>,
}

async fn list_messages(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Result<Json<MessagePage>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let page = {
        let db = state.db()?;
        require_participant(&db, query.conversation_id, viewer)?;
        db.load_messages(query.conversation_id, query.before, limit)?
    };

    Ok(Json(MessagePage {
        messages: page
            .messages
            .into_iter()
            .map(|m| state.present(m))
            .collect(),
        has_more: page.has_more,
    }))
}

async fn mark_read(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let updated = {
        let db = state.db()?;
        let role = require_participant(&db, conversation_id, viewer)?;
        db.mark_read(conversation_id, role)?
    };

    let count = updated.len();
    for message in updated {
        state.publish(RealtimeEvent::MessageUpdated {
            message: state.present(message),
        });
    }
    if count > 0 {
        info!(conversation = %conversation_id, reader = %viewer, count, "Messages marked read");
    }

    Ok(Json(MarkReadResponse { updated: count }))
}

// ─── Conversations ───

#[derive(Deserialize)]
struct DirectoryQuery {
    role: Option<Role>,
}

async fn list_conversations(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    query: Result<Query<DirectoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let db = state.db()?;
    let role = match query.role {
        Some(role) => role,
        None if db.administers_any_club(viewer)? => Role::AcademyAdmin,
        None => Role::Scout,
    };
    let summaries = db.list_conversations(viewer, role)?;
    Ok(Json(summaries))
}

async fn create_conversation(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    body: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<Json<Conversation>, ServerError> {
    let Json(request) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let db = state.db()?;
    db.get_club(request.club_id)?;
    if db.is_club_admin(request.club_id, viewer)? {
        return Err(ServerError::Forbidden(
            "Academy administrators cannot open a conversation with their own club".into(),
        ));
    }
    let conversation = db.get_or_create_conversation(viewer, request.club_id)?;
    Ok(Json(conversation))
}

async fn block_state(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<BlockState>, ServerError> {
    let db = state.db()?;
    require_participant(&db, conversation_id, viewer)?;
    Ok(Json(db.block_state(conversation_id, viewer)?))
}

async fn set_block(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    body: Result<Json<BlockRequest>, JsonRejection>,
) -> Result<Json<BlockState>, ServerError> {
    let Json(request) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    let (notice, block_state) = {
        let db = state.db()?;
        let role = require_participant(&db, conversation_id, viewer)?;
        if !role.can_moderate() {
            return Err(ServerError::Forbidden(
                "Only academy administrators can block a conversation".into(),
            ));
        }

        let key = match request.action {
            BlockAction::Block => db
                .block_conversation(conversation_id, viewer)?
                .then_some(SYSTEM_KEY_BLOCKED),
            BlockAction::Unblock => {
                if !db.unblock_conversation(conversation_id, viewer)? {
                    return Err(ServerError::Forbidden(
                        "Only the party that imposed the block can lift it".into(),
                    ));
                }
                Some(SYSTEM_KEY_UNBLOCKED)
            }
        };

        let notice = match key {
            Some(key) => Some(db.insert_message(
                conversation_id,
                viewer,
                &MessagePayload::System(key.to_string()),
            )?),
            None => None,
        };
        (notice, db.block_state(conversation_id, viewer)?)
    };

    if let Some(message) = notice {
        info!(
            conversation = %conversation_id,
            by = %viewer,
            blocked = block_state.blocked,
            "Block state changed"
        );
        state.publish(RealtimeEvent::MessageInserted { message });
    }

    Ok(Json(block_state))
}

// ─── Attachments ───

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::BadRequest(format!("Multipart error: {e}"))
}

async fn upload_attachment(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AttachmentUpload>), ServerError> {
    let max = state.config.max_attachment_size;
    let mut conversation_id: Option<ConversationId> = None;
    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "conversation_id" => {
                let text = field.text().await.map_err(multipart_error)?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| ServerError::BadRequest("Invalid conversation_id".into()))?;
                conversation_id = Some(ConversationId(id));
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if data.len() + chunk.len() > max {
                        return Err(ServerError::AttachmentTooLarge {
                            size: data.len() + chunk.len(),
                            max,
                        });
                    }
                    data.extend_from_slice(&chunk);
                }
                upload = Some((file_name, content_type, data));
            }
            _ => {}
        }
    }

    let conversation_id = conversation_id
        .ok_or_else(|| ServerError::BadRequest("Missing 'conversation_id' field".into()))?;
    let (file_name, content_type, data) =
        upload.ok_or_else(|| ServerError::BadRequest("Missing 'file' field".into()))?;

    {
        let db = state.db()?;
        require_participant(&db, conversation_id, viewer)?;
        if db.is_blocked(conversation_id)? {
            return Err(ServerError::ConversationBlocked);
        }
    }

    let stored = state
        .attachments
        .store(conversation_id, &file_name, content_type.as_deref(), &data)
        .await?;
    info!(
        conversation = %conversation_id,
        path = %stored.path,
        size = stored.size,
        "Attachment uploaded"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

#[derive(Deserialize)]
struct SignedQuery {
    expires: i64,
    sig: String,
}

async fn download_attachment(
    State(state): State<AppState>,
    Path((conversation_id, file)): Path<(String, String)>,
    query: Result<Query<SignedQuery>, QueryRejection>,
) -> Result<Response, ServerError> {
    let Query(query) =
        query.map_err(|_| ServerError::Forbidden("Missing link signature".into()))?;
    let relative = format!("{conversation_id}/{file}");

    if !state
        .attachments
        .verify(&relative, query.expires, &query.sig, Utc::now())
    {
        return Err(ServerError::Forbidden("Invalid or expired link".into()));
    }

    let data = state.attachments.read(&relative).await?;
    let mime = file
        .rsplit_once('.')
        .map(|(_, ext)| mime_for_extension(&ext.to_ascii_lowercase()))
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, mime)], data).into_response())
}

// ─── Realtime ───

async fn realtime_socket(
    Viewer(viewer): Viewer,
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    {
        let db = state.db()?;
        require_participant(&db, conversation_id, viewer)?;
    }

    // Subscribe before the upgrade completes so nothing published in between
    // is missed.
    let events = state.hub.subscribe(conversation_id);
    Ok(ws.on_upgrade(move |socket| realtime::forward_events(socket, events, conversation_id)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
