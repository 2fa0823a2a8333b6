use crate::storage::{RecordStore, StoreResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Days covered by the daily breakdown
pub const DAILY_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub conversations: u64,
    pub avg_processing_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStats {
    pub total_records: u64,
    pub total_sessions: u64,
    pub skill_counts: BTreeMap<String, u64>,
    pub most_used_skill: Option<String>,
    pub most_used_skill_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_processing_time: f64,
    pub last_conversation_at: Option<DateTime<Utc>>,
    /// Newest day first
    pub daily: Vec<DailyStats>,
    pub malformed_records: u64,
}

/// Administrative statistics computed by scanning the record store
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn RecordStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn global_stats(&self) -> StoreResult<GlobalStats> {
        self.stats_since(None).await
    }

    /// Statistics over records created at or after `since`
    pub async fn stats_since(&self, since: Option<DateTime<Utc>>) -> StoreResult<GlobalStats> {
        let rows = self.store.scan(since).await?;
        let daily_cutoff = (Utc::now() - Duration::days(DAILY_WINDOW_DAYS - 1)).date_naive();

        let mut stats = GlobalStats::default();
        let mut sessions = HashSet::new();
        let mut total_time = 0.0;
        let mut days: BTreeMap<NaiveDate, (u64, f64)> = BTreeMap::new();

        for row in rows {
            let record = match row {
                Ok(record) => record,
                Err(malformed) => {
                    tracing::warn!(
                        "[StatsAggregator] Skipping malformed record {}: {}",
                        malformed.conversation_id,
                        malformed.reason
                    );
                    stats.malformed_records += 1;
                    continue;
                }
            };

            stats.total_records += 1;
            total_time += record.processing_time;
            if record.is_error() {
                stats.error_count += 1;
            }
            if let Some(skill) = &record.skill_used {
                *stats.skill_counts.entry(skill.clone()).or_default() += 1;
            }
            stats.last_conversation_at = stats.last_conversation_at.max(Some(record.created_at));

            let day = record.created_at.date_naive();
            if day >= daily_cutoff {
                let entry = days.entry(day).or_default();
                entry.0 += 1;
                entry.1 += record.processing_time;
            }
            sessions.insert(record.session_id);
        }

        stats.total_sessions = sessions.len() as u64;
        if stats.total_records > 0 {
            stats.error_rate = stats.error_count as f64 / stats.total_records as f64;
            stats.avg_processing_time = total_time / stats.total_records as f64;
        }

        // Ties go to the alphabetically first skill
        if let Some((skill, count)) = stats
            .skill_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        {
            stats.most_used_skill = Some(skill.clone());
            stats.most_used_skill_count = *count;
        }

        stats.daily = days
            .into_iter()
            .rev()
            .map(|(date, (conversations, time))| DailyStats {
                date,
                conversations,
                avg_processing_time: time / conversations as f64,
            })
            .collect();

        tracing::debug!(
            "[StatsAggregator] Scanned {} records ({} malformed)",
            stats.total_records,
            stats.malformed_records
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConversationDraft, ConversationRecord, SessionSummary, ERROR_SKILL};
    use crate::storage::{InMemoryStore, Inserted, MalformedRecord, ScannedRow};
    use async_trait::async_trait;
    use uuid::Uuid;

    async fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let turns = [
            ("s1", Some("chat"), 1.0),
            ("s1", Some("chat"), 2.0),
            ("s2", Some("weather"), 3.0),
            ("s2", Some(ERROR_SKILL), 0.5),
            ("s3", None, 1.5),
        ];
        for (session, skill, seconds) in turns {
            let mut draft =
                ConversationDraft::new(session, "q", "a").with_processing_time(seconds);
            draft.skill_used = skill.map(str::to_string);
            store.insert(&draft).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_global_stats() {
        let stats = StatsAggregator::new(seeded().await)
            .global_stats()
            .await
            .unwrap();

        assert_eq!(stats.total_records, 5);
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.skill_counts["chat"], 2);
        assert_eq!(stats.skill_counts["weather"], 1);
        assert_eq!(stats.most_used_skill.as_deref(), Some("chat"));
        assert_eq!(stats.most_used_skill_count, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.error_rate - 0.2).abs() < 1e-9);
        assert!((stats.avg_processing_time - 1.6).abs() < 1e-9);
        assert!(stats.last_conversation_at.is_some());
        assert_eq!(stats.daily.len(), 1);
        assert_eq!(stats.daily[0].conversations, 5);
        assert_eq!(stats.malformed_records, 0);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let stats = StatsAggregator::new(Arc::new(InMemoryStore::new()))
            .global_stats()
            .await
            .unwrap();
        assert_eq!(stats, GlobalStats::default());
    }

    #[tokio::test]
    async fn test_stats_since_future_is_empty() {
        let aggregator = StatsAggregator::new(seeded().await);
        let stats = aggregator
            .stats_since(Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(stats.total_records, 0);
    }

    /// Store whose scan yields one malformed row next to the real ones
    struct CorruptStore(InMemoryStore);

    #[async_trait]
    impl RecordStore for CorruptStore {
        async fn insert(&self, d: &ConversationDraft) -> StoreResult<Inserted> {
            self.0.insert(d).await
        }
        async fn recent(&self, s: &str, l: usize, o: usize) -> StoreResult<Vec<ConversationRecord>> {
            self.0.recent(s, l, o).await
        }
        async fn get(&self, id: Uuid) -> StoreResult<Option<ConversationRecord>> {
            self.0.get(id).await
        }
        async fn summarize(&self, s: &str) -> StoreResult<Option<SessionSummary>> {
            self.0.summarize(s).await
        }
        async fn scan(&self, since: Option<DateTime<Utc>>) -> StoreResult<Vec<ScannedRow>> {
            let mut rows = self.0.scan(since).await?;
            rows.push(Err(MalformedRecord {
                conversation_id: "broken".to_string(),
                reason: "invalid created_at".to_string(),
            }));
            Ok(rows)
        }
    }

    #[tokio::test]
    async fn test_malformed_rows_are_counted_not_fatal() {
        let inner = InMemoryStore::new();
        inner
            .insert(&ConversationDraft::new("s1", "q", "a").with_skill("chat"))
            .await
            .unwrap();

        let stats = StatsAggregator::new(Arc::new(CorruptStore(inner)))
            .global_stats()
            .await
            .unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.malformed_records, 1);
    }
}
