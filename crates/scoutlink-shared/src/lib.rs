//! # scoutlink-shared
//!
//! Types shared by every Scoutlink crate: identifier newtypes, the message
//! data model, the REST and realtime wire shapes, and the error taxonomy
//! that both the server and the client speak.

pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::{ErrorKind, ProtocolError, ValidationError};
pub use message::{FileMeta, Message, MessageKind, MessagePayload};
pub use types::{ClubId, ConnectionState, ConversationId, MessageId, PlayerId, Role, UserId};
