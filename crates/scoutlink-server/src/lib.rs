//! # scoutlink-server
//!
//! HTTP API for scout/academy conversations.
//!
//! - **REST API** (axum) for sending, paging and read-marking messages, the
//!   conversation directory, and blocking
//! - **Realtime fan-out** of message inserts and updates over one WebSocket
//!   per open thread
//! - **Attachment uploads** stored on disk and served through signed links
//! - **Per-IP rate limiting** and an hourly per-sender message quota

pub mod api;
pub mod attachments;
pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod realtime;

pub use api::{build_router, serve, AppState};
pub use attachments::AttachmentStore;
pub use config::ServerConfig;
pub use error::ServerError;
