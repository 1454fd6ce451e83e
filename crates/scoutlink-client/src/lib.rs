//! # scoutlink-client
//!
//! Client side of Scoutlink conversations: REST access, the realtime bridge,
//! the optimistic message list, and the per-thread session that ties them
//! together.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod format;
pub mod moderation;
pub mod reconciler;
pub mod session;
pub mod viewport;

pub use api::{load_directory, DirectoryState, HttpMessageApi, MessageApi};
pub use config::ClientConfig;
pub use error::ClientError;
pub use reconciler::{Entry, EntryId, EntryStatus, Reconciler, TempId};
pub use session::{ThreadCommand, ThreadHandle, ThreadParams, ThreadSnapshot};
