//! # scoutlink-store
//!
//! Relational storage for conversations, messages and blocks, backed by
//! SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every operation the
//! messaging API needs: message insert, cursor pagination, read marking, the
//! per-viewer conversation directory, and block records.

pub mod blocks;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;

mod error;
#[cfg(test)]
mod testing;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
