//! Logging Pipeline
//!
//! Information Hiding:
//! - Durable-write retry strategy hidden
//! - Cache update ordering (store first, cache second) internalized
//! - Failures reported as values, never raised to the caller

pub mod diagnostics;
pub mod dispatcher;

pub use diagnostics::{DiagnosticsSnapshot, LogDiagnostics};
pub use dispatcher::LogDispatcherHandle;

use crate::cache::FastCache;
use crate::core::{ConversationDraft, ConversationRecord};
use crate::storage::{Inserted, RecordStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on immediate durable-write retries
pub const MAX_WRITE_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Stored and cached
    Logged,
    /// The conversation id was already stored; nothing changed
    Duplicate,
    /// Stored, but the cache could not be updated
    CacheDegraded,
    /// Not stored
    Failed,
}

/// What happened to one turn. Success means the record is durable.
#[derive(Debug, Clone, Serialize)]
pub struct LogOutcome {
    pub conversation_id: Uuid,
    pub status: LogStatus,
    pub diagnostic: Option<String>,
}

impl LogOutcome {
    fn new(conversation_id: Uuid, status: LogStatus, diagnostic: Option<String>) -> Self {
        Self {
            conversation_id,
            status,
            diagnostic,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != LogStatus::Failed
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }
}

/// Persists drafts to the record store, then mirrors them into the cache
pub struct LoggingPipeline {
    store: Arc<dyn RecordStore>,
    cache: FastCache,
    write_retries: u32,
    diagnostics: Arc<LogDiagnostics>,
}

impl LoggingPipeline {
    pub fn new(store: Arc<dyn RecordStore>, cache: FastCache) -> Self {
        Self {
            store,
            cache,
            write_retries: MAX_WRITE_RETRIES,
            diagnostics: Arc::new(LogDiagnostics::default()),
        }
    }

    pub fn with_write_retries(mut self, retries: u32) -> Self {
        if retries > MAX_WRITE_RETRIES {
            tracing::warn!(
                "[LoggingPipeline] write_retries={} capped at {}",
                retries,
                MAX_WRITE_RETRIES
            );
        }
        self.write_retries = retries.min(MAX_WRITE_RETRIES);
        self
    }

    pub fn diagnostics(&self) -> Arc<LogDiagnostics> {
        self.diagnostics.clone()
    }

    /// Log one turn. Never returns an error: the outcome carries the diagnostic.
    pub async fn log(&self, draft: ConversationDraft) -> LogOutcome {
        self.diagnostics.record_attempt();
        let conversation_id = draft.conversation_id;

        if let Err(e) = draft.validate() {
            tracing::warn!(
                "[LoggingPipeline] Rejected conversation {}: {}",
                conversation_id,
                e
            );
            self.diagnostics.record_failed();
            return LogOutcome::new(conversation_id, LogStatus::Failed, Some(e.to_string()));
        }

        let inserted = match self.persist(&draft).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::error!(
                    "[LoggingPipeline] Durable write of conversation {} failed: {}",
                    conversation_id,
                    e
                );
                self.diagnostics.record_failed();
                return LogOutcome::new(
                    conversation_id,
                    LogStatus::Failed,
                    Some(format!("durable write failed: {}", e)),
                );
            }
        };

        if !inserted.fresh {
            if !inserted.record.same_content(&draft) {
                tracing::warn!(
                    "[LoggingPipeline] Conversation {} re-logged with different content; keeping the stored version",
                    conversation_id
                );
            }
            self.diagnostics.record_duplicate();
            return LogOutcome::new(conversation_id, LogStatus::Duplicate, None);
        }

        if self.update_cache(&inserted.record).await {
            tracing::info!(
                "[LoggingPipeline] Conversation logged: {} (session '{}', skill {:?})",
                conversation_id,
                inserted.record.session_id,
                inserted.record.skill_used
            );
            self.diagnostics.record_committed();
            LogOutcome::new(conversation_id, LogStatus::Logged, None)
        } else {
            self.diagnostics.record_cache_degraded();
            LogOutcome::new(
                conversation_id,
                LogStatus::CacheDegraded,
                Some("record stored; cache update failed".to_string()),
            )
        }
    }

    async fn persist(&self, draft: &ConversationDraft) -> Result<Inserted, StoreError> {
        let mut attempt = 0;
        loop {
            match self.store.insert(draft).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if e.is_transient() && attempt < self.write_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "[LoggingPipeline] Retrying durable write of {} (attempt {}/{}): {}",
                        draft.conversation_id,
                        attempt + 1,
                        self.write_retries + 1,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Push onto the recent list and drop the stale summary. The summary is
    /// recomputed from the store by the next reader.
    async fn update_cache(&self, record: &ConversationRecord) -> bool {
        // Before the push: a reader filling the cache concurrently must see the write
        self.cache.advance_epoch(&record.session_id);
        let pushed = self.cache.push_recent(&record.session_id, record).await;
        if !pushed {
            // A gap in the list would be served as history; drop it instead
            self.cache.invalidate_recent(&record.session_id).await;
        }
        let invalidated = self.cache.invalidate_summary(&record.session_id).await;
        pushed && invalidated
    }
}
