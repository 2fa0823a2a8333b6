use crate::cache::FastCache;
use crate::core::{ConversationRecord, SessionSummary};
use crate::storage::{RecordStore, StoreResult};
use std::sync::Arc;
use uuid::Uuid;

/// Serves history and summaries, cache first
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn RecordStore>,
    cache: FastCache,
}

impl QueryService {
    pub fn new(store: Arc<dyn RecordStore>, cache: FastCache) -> Self {
        Self { store, cache }
    }

    /// Most recent `limit` records of a session, newest first.
    ///
    /// A cached list that cannot cover `limit` counts as a miss: the store
    /// answers and the cache is rebuilt from that answer.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ConversationRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(cached) = self.cache.get_recent(session_id, limit).await {
            if cached.len() >= limit {
                tracing::debug!(
                    "[QueryService] History cache hit for '{}' ({} records)",
                    session_id,
                    cached.len()
                );
                return Ok(cached);
            }
        }

        let fetch = limit.max(self.cache.policy().recent_capacity);
        let epoch = self.cache.epoch(session_id);
        let mut records = self.store.recent(session_id, fetch, 0).await?;
        tracing::debug!(
            "[QueryService] History for '{}' loaded from store ({} records)",
            session_id,
            records.len()
        );

        if !records.is_empty() {
            self.cache.backfill_recent(session_id, &records, epoch).await;
        }
        records.truncate(limit);
        Ok(records)
    }

    /// Older pages always come from the store
    pub async fn get_history_page(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ConversationRecord>> {
        if offset == 0 {
            return self.get_history(session_id, limit).await;
        }
        self.store.recent(session_id, limit, offset).await
    }

    /// `None` when the session has no records
    pub async fn get_summary(&self, session_id: &str) -> StoreResult<Option<SessionSummary>> {
        if let Some(summary) = self.cache.get_summary(session_id).await {
            tracing::debug!("[QueryService] Summary cache hit for '{}'", session_id);
            return Ok(Some(summary));
        }

        let epoch = self.cache.epoch(session_id);
        let summary = self.store.summarize(session_id).await?;
        if let Some(summary) = &summary {
            self.cache.backfill_summary(summary, epoch).await;
        }
        Ok(summary)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
    ) -> StoreResult<Option<ConversationRecord>> {
        if let Some(record) = self.cache.get_conversation(conversation_id).await {
            return Ok(Some(record));
        }

        let record = self.store.get(conversation_id).await?;
        if let Some(record) = &record {
            self.cache.put_conversation(record).await;
        }
        Ok(record)
    }
}
