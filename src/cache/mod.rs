//! Fast Cache
//!
//! Information Hiding:
//! - Backend protocol (Redis, in-process) hidden behind `CacheBackend`
//! - TTL and recent-list capacity policy owned by `FastCache`
//! - Backend failures never leave this module: they become misses
//!
//! The cache only ever holds copies of committed records. Correctness never
//! depends on it.

use crate::config::CacheConfig;
use crate::core::{ConversationRecord, SessionSummary};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use self::epoch::SessionEpochs;

pub mod epoch;
pub mod memory;
pub mod redis;

pub use self::memory::InMemoryCache;
pub use self::redis::RedisCache;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Raw key-value operations a cache backend must provide.
///
/// Recent lists are kept newest first. Every write refreshes the key's TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Up to `limit` newest records. `None` when the list is absent or expired.
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> CacheResult<Option<Vec<ConversationRecord>>>;

    /// Prepend one record, trimming the list to `capacity`
    async fn push_recent(
        &self,
        session_id: &str,
        record: &ConversationRecord,
        capacity: usize,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Replace the whole list (records newest first)
    async fn replace_recent(
        &self,
        session_id: &str,
        records: &[ConversationRecord],
        ttl: Duration,
    ) -> CacheResult<()>;

    async fn remove_recent(&self, session_id: &str) -> CacheResult<()>;

    async fn summary(&self, session_id: &str) -> CacheResult<Option<SessionSummary>>;

    async fn put_summary(&self, summary: &SessionSummary, ttl: Duration) -> CacheResult<()>;

    async fn remove_summary(&self, session_id: &str) -> CacheResult<()>;

    async fn conversation(&self, conversation_id: Uuid)
        -> CacheResult<Option<ConversationRecord>>;

    async fn put_conversation(&self, record: &ConversationRecord, ttl: Duration)
        -> CacheResult<()>;

    fn name(&self) -> &'static str;
}

/// TTL and capacity policy
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub recent_ttl: Duration,
    pub summary_ttl: Duration,
    pub recent_capacity: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            recent_ttl: Duration::from_secs(3600),
            summary_ttl: Duration::from_secs(86_400),
            recent_capacity: 50,
        }
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            recent_ttl: Duration::from_secs(config.recent_ttl_secs),
            summary_ttl: Duration::from_secs(config.summary_ttl_secs),
            recent_capacity: config.recent_capacity.max(1),
        }
    }
}

/// Cache facade used by the pipeline and the query service.
///
/// Reads return `None` on any backend failure. Writes return `false` so the
/// pipeline can report a degraded outcome; nothing here returns an error.
#[derive(Clone)]
pub struct FastCache {
    backend: Option<Arc<dyn CacheBackend>>,
    policy: CachePolicy,
    epochs: Arc<SessionEpochs>,
}

impl FastCache {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: CachePolicy) -> Self {
        Self {
            backend: Some(backend),
            policy,
            epochs: Arc::new(SessionEpochs::new()),
        }
    }

    /// A cache that always misses and accepts every write
    pub fn disabled() -> Self {
        Self {
            backend: None,
            policy: CachePolicy::default(),
            epochs: Arc::new(SessionEpochs::new()),
        }
    }

    /// Epoch to capture before a store read that will fill the cache
    pub fn epoch(&self, session_id: &str) -> u64 {
        self.epochs.current(session_id)
    }

    /// Called by writers once a record is durable, before any cache update
    pub fn advance_epoch(&self, session_id: &str) {
        self.epochs.advance(session_id);
    }

    fn epoch_moved(&self, session_id: &str, observed: u64) -> bool {
        self.epochs.current(session_id) != observed
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub async fn get_recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Option<Vec<ConversationRecord>> {
        let backend = self.backend.as_ref()?;
        let limit = limit.min(self.policy.recent_capacity);
        miss_on_error(backend.name(), "get_recent", backend.recent(session_id, limit).await)
    }

    pub async fn push_recent(&self, session_id: &str, record: &ConversationRecord) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        let result = backend
            .push_recent(
                session_id,
                record,
                self.policy.recent_capacity,
                self.policy.recent_ttl,
            )
            .await;
        written(backend.name(), "push_recent", result)
    }

    /// Backfill the recent list from store results (newest first)
    pub async fn put_recent(&self, session_id: &str, records: &[ConversationRecord]) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        let capped = &records[..records.len().min(self.policy.recent_capacity)];
        let result = backend
            .replace_recent(session_id, capped, self.policy.recent_ttl)
            .await;
        written(backend.name(), "put_recent", result)
    }

    pub async fn invalidate_recent(&self, session_id: &str) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        written(
            backend.name(),
            "invalidate_recent",
            backend.remove_recent(session_id).await,
        )
    }

    /// Fill the recent list from a store read that began at `observed`.
    /// If a write landed since, the fill is removed again: the list it
    /// replaced may have held that write.
    pub async fn backfill_recent(
        &self,
        session_id: &str,
        records: &[ConversationRecord],
        observed: u64,
    ) -> bool {
        let stored = self.put_recent(session_id, records).await;
        if self.epoch_moved(session_id, observed) {
            tracing::debug!(
                "[FastCache] Session '{}' written during history read, dropping backfill",
                session_id
            );
            self.invalidate_recent(session_id).await;
            return false;
        }
        stored
    }

    /// Cache a summary computed from a store read that began at `observed`
    pub async fn backfill_summary(&self, summary: &SessionSummary, observed: u64) -> bool {
        let stored = self.put_summary(summary).await;
        if self.epoch_moved(&summary.session_id, observed) {
            tracing::debug!(
                "[FastCache] Session '{}' written during summary read, dropping it",
                summary.session_id
            );
            self.invalidate_summary(&summary.session_id).await;
            return false;
        }
        stored
    }

    pub async fn get_summary(&self, session_id: &str) -> Option<SessionSummary> {
        let backend = self.backend.as_ref()?;
        miss_on_error(backend.name(), "get_summary", backend.summary(session_id).await)
    }

    pub async fn put_summary(&self, summary: &SessionSummary) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        written(
            backend.name(),
            "put_summary",
            backend.put_summary(summary, self.policy.summary_ttl).await,
        )
    }

    pub async fn invalidate_summary(&self, session_id: &str) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        written(
            backend.name(),
            "invalidate_summary",
            backend.remove_summary(session_id).await,
        )
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> Option<ConversationRecord> {
        let backend = self.backend.as_ref()?;
        miss_on_error(
            backend.name(),
            "get_conversation",
            backend.conversation(conversation_id).await,
        )
    }

    pub async fn put_conversation(&self, record: &ConversationRecord) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        written(
            backend.name(),
            "put_conversation",
            backend.put_conversation(record, self.policy.recent_ttl).await,
        )
    }
}

fn miss_on_error<T>(backend: &str, op: &str, result: CacheResult<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("[FastCache] {} {} failed, treating as miss: {}", backend, op, e);
            None
        }
    }
}

fn written(backend: &str, op: &str, result: CacheResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("[FastCache] {} {} failed: {}", backend, op, e);
            false
        }
    }
}

/// Backend whose every call fails, for exercising degraded paths
#[cfg(test)]
pub(crate) mod failing {
    use super::*;

    pub struct UnreachableCache;

    fn down<T>() -> CacheResult<T> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    #[async_trait]
    impl CacheBackend for UnreachableCache {
        async fn recent(&self, _: &str, _: usize) -> CacheResult<Option<Vec<ConversationRecord>>> {
            down()
        }
        async fn push_recent(
            &self,
            _: &str,
            _: &ConversationRecord,
            _: usize,
            _: Duration,
        ) -> CacheResult<()> {
            down()
        }
        async fn replace_recent(
            &self,
            _: &str,
            _: &[ConversationRecord],
            _: Duration,
        ) -> CacheResult<()> {
            down()
        }
        async fn remove_recent(&self, _: &str) -> CacheResult<()> {
            down()
        }
        async fn summary(&self, _: &str) -> CacheResult<Option<SessionSummary>> {
            down()
        }
        async fn put_summary(&self, _: &SessionSummary, _: Duration) -> CacheResult<()> {
            down()
        }
        async fn remove_summary(&self, _: &str) -> CacheResult<()> {
            down()
        }
        async fn conversation(&self, _: Uuid) -> CacheResult<Option<ConversationRecord>> {
            down()
        }
        async fn put_conversation(&self, _: &ConversationRecord, _: Duration) -> CacheResult<()> {
            down()
        }
        fn name(&self) -> &'static str {
            "unreachable"
        }
    }
}
