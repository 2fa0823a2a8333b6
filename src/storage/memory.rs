//! In-Memory Record Store
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and ephemeral sessions

use super::{next_created_at, Inserted, RecordStore, ScannedRow, StoreResult};
use crate::core::{ConversationDraft, ConversationRecord, SessionSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    by_id: HashMap<Uuid, ConversationRecord>,
    // session_id -> conversation ids in commit order
    by_session: HashMap<String, Vec<Uuid>>,
}

/// In-memory store using HashMaps
/// Data is lost when process terminates
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.by_id.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, draft: &ConversationDraft) -> StoreResult<Inserted> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.by_id.get(&draft.conversation_id) {
            tracing::debug!(
                "[InMemoryStore] Conversation {} already stored, ignoring insert",
                draft.conversation_id
            );
            return Ok(Inserted {
                record: existing.clone(),
                fresh: false,
            });
        }

        let latest = tables
            .by_session
            .get(&draft.session_id)
            .and_then(|ids| ids.last())
            .and_then(|id| tables.by_id.get(id))
            .map(|r| r.created_at);

        let record = draft.clone().commit(next_created_at(latest));
        tables
            .by_session
            .entry(record.session_id.clone())
            .or_default()
            .push(record.conversation_id);
        tables.by_id.insert(record.conversation_id, record.clone());

        tracing::debug!(
            "[InMemoryStore] Stored conversation {} for session '{}'",
            record.conversation_id,
            record.session_id
        );
        Ok(Inserted {
            record,
            fresh: true,
        })
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ConversationRecord>> {
        let tables = self.tables.read().await;
        let records = tables
            .by_session
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .filter_map(|id| tables.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }

    async fn get(&self, conversation_id: Uuid) -> StoreResult<Option<ConversationRecord>> {
        Ok(self.tables.read().await.by_id.get(&conversation_id).cloned())
    }

    async fn summarize(&self, session_id: &str) -> StoreResult<Option<SessionSummary>> {
        let tables = self.tables.read().await;
        let Some(ids) = tables.by_session.get(session_id) else {
            return Ok(None);
        };
        let records = ids.iter().filter_map(|id| tables.by_id.get(id));
        Ok(SessionSummary::from_records(session_id, records))
    }

    async fn scan(&self, since: Option<DateTime<Utc>>) -> StoreResult<Vec<ScannedRow>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ConversationRecord> = tables
            .by_id
            .values()
            .filter(|r| since.map_or(true, |s| r.created_at >= s))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows.into_iter().map(Ok).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_recent() {
        let store = InMemoryStore::new();
        let first = ConversationDraft::new("s1", "Hello", "Hi");
        let second = ConversationDraft::new("s1", "How are you?", "Fine");

        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let recent = store.recent("s1", 10, 0).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_message, "How are you?");
        assert_eq!(recent[1].user_message, "Hello");
        assert!(recent[0].created_at > recent[1].created_at);
    }

    #[tokio::test]
    async fn test_recent_for_unknown_session() {
        let store = InMemoryStore::new();
        assert!(store.recent("nonexistent", 10, 0).await.unwrap().is_empty());
        assert!(store.summarize("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let store = InMemoryStore::new();
        let draft = ConversationDraft::new("s1", "Hello", "Hi");

        let first = store.insert(&draft).await.unwrap();
        let second = store.insert(&draft).await.unwrap();

        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.record, second.record);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_recent_with_offset() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .insert(&ConversationDraft::new("s1", format!("m{}", i), "r"))
                .await
                .unwrap();
        }

        let page = store.recent("s1", 2, 2).await.unwrap();
        let messages: Vec<_> = page.iter().map(|r| r.user_message.as_str()).collect();
        assert_eq!(messages, vec!["m2", "m1"]);
    }
}
