//! `HttpMessageApi` and the realtime bridge against a live server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use scoutlink_client::reconciler::EntryStatus;
use scoutlink_client::{ClientConfig, HttpMessageApi, MessageApi, ThreadHandle, ThreadParams};
use scoutlink_server::{build_router, AppState, AttachmentStore, ServerConfig};
use scoutlink_shared::protocol::{BlockAction, SendMessageRequest};
use scoutlink_shared::{
    ClubId, ConnectionState, ConversationId, ErrorKind, Message, MessagePayload, Role, UserId,
};
use scoutlink_store::{Club, Database, User};

struct Server {
    base_url: String,
    scout: UserId,
    admin: UserId,
    conversation: ConversationId,
    _dir: TempDir,
}

impl Server {
    fn api(&self, user: UserId) -> HttpMessageApi {
        HttpMessageApi::new(ClientConfig::new(&self.base_url), user).unwrap()
    }
}

fn seed_user(db: &Database, name: &str) -> UserId {
    let id = UserId::new();
    db.upsert_user(&User {
        id,
        display_name: name.into(),
        created_at: Utc::now(),
    })
    .unwrap();
    id
}

async fn start_server(quota: u32) -> Server {
    let dir = TempDir::new().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    let config = ServerConfig {
        attachment_storage_path: dir.path().join("files"),
        hourly_message_quota: quota,
        public_base_url: base_url.clone(),
        ..ServerConfig::default()
    };
    let db = Database::open_at(&dir.path().join("server.db")).unwrap();
    let scout = seed_user(&db, "Scout Sam");
    let admin = seed_user(&db, "Admin Alex");
    let club = ClubId::new();
    db.upsert_club(&Club {
        id: club,
        name: "River Academy".into(),
        created_at: Utc::now(),
    })
    .unwrap();
    db.add_club_admin(club, admin).unwrap();
    let conversation = db.get_or_create_conversation(scout, club).unwrap().id;

    let attachments = AttachmentStore::new(&config).await.unwrap();
    let app = build_router(AppState::new(config, db, attachments));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Server {
        base_url,
        scout,
        admin,
        conversation,
        _dir: dir,
    }
}

async fn send_text(api: &HttpMessageApi, conversation: ConversationId, content: &str) -> Message {
    let payload = MessagePayload::Text(content.into());
    api.send_message(SendMessageRequest::new(conversation, &payload))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_send_page_and_mark_read_over_http() {
    let server = start_server(60).await;
    let scout = server.api(server.scout);
    let admin = server.api(server.admin);

    let mut sent = Vec::new();
    for content in ["First report", "Second report", "Third report"] {
        sent.push(send_text(&scout, server.conversation, content).await);
    }
    assert_eq!(sent[0].sender_id, server.scout);
    assert_eq!(sent[0].payload, MessagePayload::Text("First report".into()));

    let newest = admin
        .load_messages(server.conversation, None, 2)
        .await
        .unwrap();
    let ids: Vec<_> = newest.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![sent[1].id, sent[2].id]);
    assert!(newest.has_more);

    let older = admin
        .load_messages(server.conversation, Some(sent[1].id), 2)
        .await
        .unwrap();
    let ids: Vec<_> = older.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![sent[0].id]);
    assert!(!older.has_more);

    assert_eq!(admin.mark_read(server.conversation).await.unwrap().updated, 3);
    assert_eq!(admin.mark_read(server.conversation).await.unwrap().updated, 0);

    let inbox = admin.list_conversations().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].unread_count, 0);
}

#[tokio::test]
async fn test_upload_then_send_file() {
    let server = start_server(60).await;
    let scout = server.api(server.scout);

    let upload = scout
        .upload_attachment(
            server.conversation,
            "trial-report.pdf".into(),
            Some("application/pdf".into()),
            b"%PDF-1.4 report".to_vec(),
        )
        .await
        .unwrap();
    assert!(upload.path.starts_with(&server.conversation.to_string()));
    assert_eq!(upload.size, 15);

    let payload = MessagePayload::File(upload.into());
    let message = scout
        .send_message(SendMessageRequest::new(server.conversation, &payload))
        .await
        .unwrap();
    let MessagePayload::File(file) = &message.payload else {
        panic!("expected a file message, got {:?}", message.payload);
    };
    assert_eq!(file.name, "trial-report.pdf");
    assert!(file.url.starts_with(&format!("{}/attachments/", server.base_url)));

    let body = reqwest::get(&file.url).await.unwrap().bytes().await.unwrap();
    assert_eq!(&body[..], b"%PDF-1.4 report");
}

#[tokio::test]
async fn test_server_error_kinds_reach_the_client() {
    let server = start_server(1).await;
    let scout = server.api(server.scout);
    let admin = server.api(server.admin);

    send_text(&scout, server.conversation, "Only one this hour").await;
    let payload = MessagePayload::Text("One too many".into());
    let err = scout
        .send_message(SendMessageRequest::new(server.conversation, &payload))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);

    let state = admin
        .set_block(server.conversation, BlockAction::Block)
        .await
        .unwrap();
    assert!(state.blocked && state.blocked_by_me);
    assert!(scout.block_state(server.conversation).await.unwrap().blocked);

    let err = admin
        .send_message(SendMessageRequest::new(server.conversation, &payload))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversationBlocked);

    let err = scout
        .set_block(server.conversation, BlockAction::Unblock)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let outsider = server.api(UserId::new());
    let err = outsider
        .load_messages(server.conversation, None, 10)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotParticipant);
}

#[tokio::test]
async fn test_thread_receives_counterpart_message_live() {
    let server = start_server(60).await;
    let admin = server.api(server.admin);
    let params = ThreadParams {
        conversation_id: server.conversation,
        viewer: server.scout,
        role: Role::Scout,
    };
    let config = ClientConfig::new(&server.base_url);
    let mut thread = ThreadHandle::open(
        Arc::new(server.api(server.scout)),
        config,
        params,
    );

    tokio::time::timeout(
        Duration::from_secs(5),
        thread.wait_for(|s| s.connection == Some(ConnectionState::Connected)),
    )
    .await
    .unwrap()
    .unwrap();

    let reply = send_text(&admin, server.conversation, "Come to Saturday's trial").await;
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        thread.wait_for(|s| s.entries.len() == 1),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(snapshot.entries[0].message_id(), Some(reply.id));

    thread.send_text("I'll be there").await.unwrap();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        thread.wait_for(|s| s.entries.len() == 2 && s.entries[1].status == EntryStatus::Sent),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(snapshot.entries[1].message_id().is_some());
}
