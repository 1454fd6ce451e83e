//! REST access to the messaging server.
//!
//! [`MessageApi`] is the seam the thread session talks through; the
//! production implementation is [`HttpMessageApi`] over `reqwest`.

use async_trait::async_trait;
use reqwest::{multipart, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use scoutlink_shared::protocol::{
    AttachmentUpload, BlockAction, BlockRequest, BlockState, ConversationSummary, ErrorBody,
    MarkReadResponse, MessagePage, SendMessageRequest,
};
use scoutlink_shared::{ConversationId, ErrorKind, Message, MessageId, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;

#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ClientError>;

    async fn load_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<MessagePage, ClientError>;

    async fn mark_read(&self, conversation_id: ConversationId)
        -> Result<MarkReadResponse, ClientError>;

    async fn block_state(&self, conversation_id: ConversationId) -> Result<BlockState, ClientError>;

    async fn set_block(
        &self,
        conversation_id: ConversationId,
        action: BlockAction,
    ) -> Result<BlockState, ClientError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError>;

    async fn upload_attachment(
        &self,
        conversation_id: ConversationId,
        file_name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    ) -> Result<AttachmentUpload, ClientError>;
}

pub struct HttpMessageApi {
    client: reqwest::Client,
    config: ClientConfig,
    viewer: UserId,
}

impl HttpMessageApi {
    pub fn new(config: ClientConfig, viewer: UserId) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            viewer,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.config.endpoint(path))
            .bearer_auth(self.viewer)
    }
}

/// Decode a success body, or turn an error response into a [`ClientError`]
/// carrying the server's error kind.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let text = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %text, "Request failed");
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(ClientError::api(body.kind, body.error)),
        Err(_) => Err(ClientError::api(
            ErrorKind::from_http_status(status.as_u16()),
            format!("HTTP {status}"),
        )),
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ClientError> {
        let response = self
            .request(Method::POST, "/messages")
            .json(&request)
            .send()
            .await?;
        decode(response).await
    }

    async fn load_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<MessagePage, ClientError> {
        let mut query = vec![
            ("conversation_id", conversation_id.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        let response = self
            .request(Method::GET, "/messages")
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<MarkReadResponse, ClientError> {
        let response = self
            .request(Method::PATCH, &format!("/messages/{conversation_id}/read"))
            .send()
            .await?;
        decode(response).await
    }

    async fn block_state(&self, conversation_id: ConversationId) -> Result<BlockState, ClientError> {
        let response = self
            .request(Method::GET, &format!("/conversations/{conversation_id}/block"))
            .send()
            .await?;
        decode(response).await
    }

    async fn set_block(
        &self,
        conversation_id: ConversationId,
        action: BlockAction,
    ) -> Result<BlockState, ClientError> {
        let response = self
            .request(Method::POST, &format!("/conversations/{conversation_id}/block"))
            .json(&BlockRequest { action })
            .send()
            .await?;
        decode(response).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let response = self.request(Method::GET, "/conversations").send().await?;
        decode(response).await
    }

    async fn upload_attachment(
        &self,
        conversation_id: ConversationId,
        file_name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    ) -> Result<AttachmentUpload, ClientError> {
        let mut part = multipart::Part::bytes(data).file_name(file_name);
        if let Some(mime) = mime_type {
            part = part
                .mime_str(&mime)
                .map_err(|e| ClientError::api(ErrorKind::ValidationFailed, e.to_string()))?;
        }
        let form = multipart::Form::new()
            .text("conversation_id", conversation_id.to_string())
            .part("file", part);

        let response = self
            .request(Method::POST, "/attachments")
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }
}

/// What the inbox shows.  An empty inbox and a failed load are different
/// states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryState {
    Loading,
    Loaded(Vec<ConversationSummary>),
    Failed(ErrorKind),
}

impl DirectoryState {
    pub fn total_unread(&self) -> u32 {
        match self {
            DirectoryState::Loaded(rows) => rows.iter().map(|r| r.unread_count).sum(),
            _ => 0,
        }
    }
}

pub async fn load_directory(api: &dyn MessageApi) -> DirectoryState {
    match api.list_conversations().await {
        Ok(rows) => DirectoryState::Loaded(rows),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load conversations");
            DirectoryState::Failed(e.kind())
        }
    }
}
