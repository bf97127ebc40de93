//! Persisted chat records.
//!
//! The realtime relay only needs three operations from storage, expressed by
//! [`ChatStore`]. Everything else here backs the REST API.

pub mod records;
pub mod sqlite;

use async_trait::async_trait;

pub use {
    records::{ChatRecord, MemberRecord, MessageRecord, UserRecord, now_ms, to_datetime},
    sqlite::SqliteStore,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Conflict(&'static str),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Persisted-membership operations consumed by the realtime relay.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn check_membership(&self, chat_id: i64, user_id: i64) -> Result<bool>;

    async fn create_message(&self, chat_id: i64, user_id: i64, content: &str)
    -> Result<MessageRecord>;

    async fn list_members(&self, chat_id: i64) -> Result<Vec<i64>>;
}
