//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use scoutlink_shared::constants::{
    ALLOWED_ATTACHMENT_EXTENSIONS, DEFAULT_HOURLY_MESSAGE_QUOTA, DEFAULT_HTTP_PORT,
    MAX_ATTACHMENT_SIZE, QUOTA_WINDOW_SECS, SIGNED_URL_TTL_SECS,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Base URL clients reach this server on; used to build signed links.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory.
    pub database_path: Option<PathBuf>,

    /// Directory where attachments are stored.
    /// Env: `ATTACHMENT_STORAGE_PATH`
    /// Default: `./attachments`
    pub attachment_storage_path: PathBuf,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_ATTACHMENT_SIZE`
    pub max_attachment_size: usize,

    /// Lower-case extensions accepted for upload.
    /// Env: `ALLOWED_EXTENSIONS` (comma separated)
    pub allowed_extensions: Vec<String>,

    /// Messages one sender may post in one conversation per window.
    /// Env: `HOURLY_MESSAGE_QUOTA`
    pub hourly_message_quota: u32,

    /// Length of the quota window.
    pub quota_window: Duration,

    /// Lifetime of signed attachment links.
    /// Env: `SIGNED_URL_TTL_SECS`
    pub signed_url_ttl_secs: i64,

    /// Key for attachment URL signatures (hex-encoded, 64 chars).
    /// Env: `URL_SIGNING_KEY`
    /// Default: random per process (development only).
    pub url_signing_key: [u8; 32],
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("public_base_url", &self.public_base_url)
            .field("database_path", &self.database_path)
            .field("attachment_storage_path", &self.attachment_storage_path)
            .field("max_attachment_size", &self.max_attachment_size)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("hourly_message_quota", &self.hourly_message_quota)
            .field("quota_window", &self.quota_window)
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .field("url_signing_key", &"<redacted>")
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            database_path: None,
            attachment_storage_path: PathBuf::from("./attachments"),
            max_attachment_size: MAX_ATTACHMENT_SIZE,
            allowed_extensions: ALLOWED_ATTACHMENT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            hourly_message_quota: DEFAULT_HOURLY_MESSAGE_QUOTA,
            quota_window: Duration::from_secs(QUOTA_WINDOW_SECS),
            signed_url_ttl_secs: SIGNED_URL_TTL_SECS,
            url_signing_key: rand::random(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("ATTACHMENT_STORAGE_PATH") {
            config.attachment_storage_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_ATTACHMENT_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_attachment_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_ATTACHMENT_SIZE, using default"),
            }
        }

        if let Ok(val) = std::env::var("ALLOWED_EXTENSIONS") {
            let parsed = parse_extensions(&val);
            if parsed.is_empty() {
                tracing::warn!(value = %val, "Empty ALLOWED_EXTENSIONS, using default");
            } else {
                config.allowed_extensions = parsed;
            }
        }

        if let Ok(val) = std::env::var("HOURLY_MESSAGE_QUOTA") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.hourly_message_quota = n,
                _ => tracing::warn!(value = %val, "Invalid HOURLY_MESSAGE_QUOTA, using default"),
            }
        }

        if let Ok(val) = std::env::var("SIGNED_URL_TTL_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.signed_url_ttl_secs = n,
                _ => tracing::warn!(value = %val, "Invalid SIGNED_URL_TTL_SECS, using default"),
            }
        }

        match std::env::var("URL_SIGNING_KEY") {
            Ok(hex_key) => match parse_hex_key(&hex_key) {
                Ok(key) => config.url_signing_key = key,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid URL_SIGNING_KEY, using a random key");
                }
            },
            Err(_) => {
                tracing::warn!("URL_SIGNING_KEY not set, signed links will not survive a restart");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_key(raw: &str) -> Result<[u8; 32], String> {
    let raw = raw.trim();
    if raw.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", raw.len()));
    }
    let bytes = hex::decode(raw).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.hourly_message_quota, 60);
        assert!(config.allowed_extensions.iter().any(|e| e == "pdf"));
    }

    #[test]
    fn test_parse_hex_key() {
        let hex = "ab".repeat(32);
        let key = parse_hex_key(&hex).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_key_wrong_length() {
        assert!(parse_hex_key("abcd").is_err());
    }

    #[test]
    fn test_parse_extensions() {
        assert_eq!(parse_extensions(" PDF, .png,,jpg "), vec!["pdf", "png", "jpg"]);
    }

    #[test]
    fn debug_output_hides_signing_key() {
        let config = ServerConfig {
            url_signing_key: [0xcd; 32],
            ..ServerConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("cdcd"));
        assert!(rendered.contains("<redacted>"));
    }
}
