//! Attachment storage and signed download links.
//!
//! Files live on disk under `<base>/<conversation_id>/<uuid>.<ext>`.  The
//! relative part of that path is what `file` messages carry; readers get a
//! time-limited link whose signature is a BLAKE3 keyed hash of the path and
//! its expiry.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use scoutlink_shared::constants::MAX_FILE_NAME_LENGTH;
use scoutlink_shared::protocol::AttachmentUpload;
use scoutlink_shared::ConversationId;

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Resolve `relative` under `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, relative: &Path) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
        }
    }
    if !resolved.starts_with(base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// MIME type served for an allowed extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Keep only the final path segment of a client-supplied name.
fn display_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    base.chars().take(MAX_FILE_NAME_LENGTH).collect()
}

pub struct AttachmentStore {
    base_path: PathBuf,
    max_size: usize,
    allowed_extensions: Vec<String>,
    signing_key: [u8; 32],
    public_base_url: String,
    ttl_secs: i64,
}

impl AttachmentStore {
    pub async fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        fs::create_dir_all(&config.attachment_storage_path)
            .await
            .map_err(|e| {
                ServerError::AttachmentStorage(format!("Failed to create storage dir: {e}"))
            })?;
        let base_path = config
            .attachment_storage_path
            .canonicalize()
            .map_err(|e| ServerError::AttachmentStorage(format!("Bad storage dir: {e}")))?;

        info!(path = %base_path.display(), "Attachment store initialized");

        Ok(Self {
            base_path,
            max_size: config.max_attachment_size,
            allowed_extensions: config.allowed_extensions.clone(),
            signing_key: config.url_signing_key,
            public_base_url: config.public_base_url.clone(),
            ttl_secs: config.signed_url_ttl_secs,
        })
    }

    /// Validate and write an uploaded file.
    pub async fn store(
        &self,
        conversation_id: ConversationId,
        file_name: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<AttachmentUpload, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::AttachmentTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = display_name(file_name);
        let ext = extension_of(&name)
            .filter(|e| self.allowed_extensions.iter().any(|a| a == e))
            .ok_or_else(|| ServerError::BadRequest(format!("File type not allowed: {name}")))?;

        let relative = format!("{}/{}.{}", conversation_id, Uuid::new_v4(), ext);
        let path = ensure_within(&self.base_path, Path::new(&relative))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| {
                ServerError::AttachmentStorage(format!("Failed to create directory: {e}"))
            })?;
        }
        fs::write(&path, data).await.map_err(|e| {
            ServerError::AttachmentStorage(format!("Failed to write {relative}: {e}"))
        })?;

        let mime_type = content_type
            .filter(|m| m.contains('/') && *m != "application/octet-stream")
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_extension(&ext).to_string());

        debug!(path = %relative, size = data.len(), "Stored attachment");
        Ok(AttachmentUpload {
            path: relative,
            name,
            mime_type,
            size: data.len() as u64,
        })
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, ServerError> {
        let path = ensure_within(&self.base_path, Path::new(relative))?;
        if !path.exists() {
            return Err(ServerError::NotFound(format!("attachment {relative}")));
        }
        fs::read(&path).await.map_err(|e| {
            ServerError::AttachmentStorage(format!("Failed to read {relative}: {e}"))
        })
    }

    /// Whether a stored path belongs to `conversation_id`'s directory.
    pub fn belongs_to(relative: &str, conversation_id: ConversationId) -> bool {
        let mut parts = relative.split('/');
        matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(dir), Some(file), None)
                if dir == conversation_id.to_string()
                    && !file.is_empty()
                    && !file.starts_with('.')
        )
    }

    fn signature(&self, relative: &str, expires: i64) -> String {
        let material = format!("{relative}\n{expires}");
        blake3::keyed_hash(&self.signing_key, material.as_bytes())
            .to_hex()
            .to_string()
    }

    /// Absolute download link for `relative`, valid for the configured TTL.
    pub fn signed_url(&self, relative: &str, now: DateTime<Utc>) -> String {
        let expires = now.timestamp() + self.ttl_secs;
        format!(
            "{}/attachments/{}?expires={}&sig={}",
            self.public_base_url,
            relative,
            expires,
            self.signature(relative, expires)
        )
    }

    pub fn verify(&self, relative: &str, expires: i64, sig: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let expected = self.signature(relative, expires);
        expected.len() == sig.len() && expected.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() == 1
    }
}
