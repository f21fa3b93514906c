//! Persistent storage.
//!
//! Only permanent bans are persisted; everything else about a connection
//! is ephemeral by design.

pub mod bandb;

pub use bandb::{BanDb, StoredBan, StoredBanKind};

use thiserror::Error;

/// Database errors. Kept here so sqlx stays an implementation detail of
/// this module.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),
}
