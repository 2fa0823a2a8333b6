//! In-Process Cache Backend
//!
//! Information Hiding:
//! - Per-key expiry bookkeeping hidden behind the backend trait
//! - Expired entries are dropped lazily on access
//! - Suitable for single-process deployments and tests

use super::{CacheBackend, CacheResult};
use crate::core::{ConversationRecord, SessionSummary};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
struct Entries {
    recent: HashMap<String, Expiring<VecDeque<ConversationRecord>>>,
    summaries: HashMap<String, Expiring<SessionSummary>>,
    conversations: HashMap<Uuid, Expiring<ConversationRecord>>,
}

/// Cache kept in process memory. Key classes expire independently.
pub struct InMemoryCache {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn live<'a, K, T>(map: &'a mut HashMap<K, Expiring<T>>, key: &K) -> Option<&'a mut Expiring<T>>
where
    K: std::hash::Hash + Eq,
{
    if map.get(key).map_or(false, |e| !e.is_live()) {
        map.remove(key);
    }
    map.get_mut(key)
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> CacheResult<Option<Vec<ConversationRecord>>> {
        let mut entries = self.entries.write().await;
        let key = session_id.to_string();
        Ok(live(&mut entries.recent, &key)
            .map(|e| e.value.iter().take(limit).cloned().collect()))
    }

    async fn push_recent(
        &self,
        session_id: &str,
        record: &ConversationRecord,
        capacity: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut entries = self.entries.write().await;
        let key = session_id.to_string();

        match live(&mut entries.recent, &key) {
            Some(entry) => {
                entry.value.push_front(record.clone());
                entry.value.truncate(capacity);
                entry.expires_at = Instant::now() + ttl;
            }
            None => {
                let mut list = VecDeque::with_capacity(capacity);
                list.push_front(record.clone());
                entries.recent.insert(key, Expiring::new(list, ttl));
            }
        }
        Ok(())
    }

    async fn replace_recent(
        &self,
        session_id: &str,
        records: &[ConversationRecord],
        ttl: Duration,
    ) -> CacheResult<()> {
        let list: VecDeque<_> = records.iter().cloned().collect();
        self.entries
            .write()
            .await
            .recent
            .insert(session_id.to_string(), Expiring::new(list, ttl));
        Ok(())
    }

    async fn remove_recent(&self, session_id: &str) -> CacheResult<()> {
        self.entries.write().await.recent.remove(session_id);
        Ok(())
    }

    async fn summary(&self, session_id: &str) -> CacheResult<Option<SessionSummary>> {
        let mut entries = self.entries.write().await;
        let key = session_id.to_string();
        Ok(live(&mut entries.summaries, &key).map(|e| e.value.clone()))
    }

    async fn put_summary(&self, summary: &SessionSummary, ttl: Duration) -> CacheResult<()> {
        self.entries.write().await.summaries.insert(
            summary.session_id.clone(),
            Expiring::new(summary.clone(), ttl),
        );
        Ok(())
    }

    async fn remove_summary(&self, session_id: &str) -> CacheResult<()> {
        self.entries.write().await.summaries.remove(session_id);
        Ok(())
    }

    async fn conversation(
        &self,
        conversation_id: Uuid,
    ) -> CacheResult<Option<ConversationRecord>> {
        let mut entries = self.entries.write().await;
        Ok(live(&mut entries.conversations, &conversation_id).map(|e| e.value.clone()))
    }

    async fn put_conversation(
        &self,
        record: &ConversationRecord,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.entries.write().await.conversations.insert(
            record.conversation_id,
            Expiring::new(record.clone(), ttl),
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
