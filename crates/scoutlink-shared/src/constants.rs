/// Application name
pub const APP_NAME: &str = "Scoutlink";

/// Maximum length of a text message, in characters
pub const MAX_TEXT_LENGTH: usize = 5_000;

/// Maximum length of an attachment display name
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Default number of messages per page
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Upper bound for a requested page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Messages one sender may post in one conversation per quota window
pub const DEFAULT_HOURLY_MESSAGE_QUOTA: u32 = 60;

/// Length of the message quota window in seconds
pub const QUOTA_WINDOW_SECS: u64 = 3_600;

/// Maximum attachment size in bytes (10 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 10 * 1024 * 1024;

/// File extensions accepted by the attachment endpoint
pub const ALLOWED_ATTACHMENT_EXTENSIONS: &[&str] =
    &["pdf", "png", "jpg", "jpeg", "webp", "doc", "docx", "mp4"];

/// Lifetime of a signed attachment URL in seconds
pub const SIGNED_URL_TTL_SECS: i64 = 3_600;

/// How far apart a pending message and its realtime echo may be
pub const ECHO_MATCH_WINDOW_SECS: i64 = 5;

/// How long an inline error notice stays visible
pub const NOTICE_TTL_SECS: u64 = 5;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// System message content keys
pub const SYSTEM_KEY_BLOCKED: &str = "conversation.blocked";
pub const SYSTEM_KEY_UNBLOCKED: &str = "conversation.unblocked";
