//! Record Store Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - Allows swapping between SQLite and in-memory stores without API changes
//! - Each implementation owns its timestamp assignment and idempotency guard

use crate::core::{ConversationDraft, ConversationRecord, SessionSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable write/read failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Busy, locked or unreachable. Worth one immediate retry.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure => StoreError::Unavailable(err.to_string()),
                ErrorCode::ConstraintViolation => StoreError::Constraint(err.to_string()),
                _ => StoreError::Database(err.to_string()),
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}

/// Result of an insert. `fresh` is false when the id was already stored,
/// in which case `record` is the previously committed row.
#[derive(Debug, Clone)]
pub struct Inserted {
    pub record: ConversationRecord,
    pub fresh: bool,
}

/// A row that could not be decoded during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    pub conversation_id: String,
    pub reason: String,
}

pub type ScannedRow = Result<ConversationRecord, MalformedRecord>;

/// Trait defining the durable conversation store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a draft, assigning `created_at`. Re-inserting an existing
    /// `conversation_id` is a no-op that returns the stored row.
    async fn insert(&self, draft: &ConversationDraft) -> StoreResult<Inserted>;

    /// Records of a session, newest first
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ConversationRecord>>;

    async fn get(&self, conversation_id: Uuid) -> StoreResult<Option<ConversationRecord>>;

    /// Aggregate over every record of the session. `None` if it has none.
    async fn summarize(&self, session_id: &str) -> StoreResult<Option<SessionSummary>>;

    /// Every record created at or after `since` (all records when `None`)
    async fn scan(&self, since: Option<DateTime<Utc>>) -> StoreResult<Vec<ScannedRow>>;

    async fn count(&self, session_id: &str) -> StoreResult<u64> {
        Ok(self
            .summarize(session_id)
            .await?
            .map(|s| s.total_conversations)
            .unwrap_or(0))
    }
}

/// Next commit time for a session: now, but never at or before the session's latest row
pub(crate) fn next_created_at(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = crate::core::record::storage_precision(Utc::now());
    match latest {
        Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
        _ => now,
    }
}
