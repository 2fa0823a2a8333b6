//! SQLite Record Store
//!
//! Information Hiding:
//! - Schema, SQL and column encodings hidden from store users
//! - Blocking rusqlite calls moved off the async runtime via spawn_blocking
//! - The shared connection is the only synchronization point

use super::{
    next_created_at, Inserted, MalformedRecord, RecordStore, ScannedRow, StoreError, StoreResult,
};
use crate::core::record::{decode_timestamp, encode_timestamp};
use crate::core::{ConversationDraft, ConversationRecord, Metadata, SessionSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    session_id      TEXT NOT NULL,
    user_message    TEXT NOT NULL,
    agent_response  TEXT NOT NULL,
    skill_used      TEXT,
    processing_time REAL NOT NULL DEFAULT 0,
    metadata        TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_session_created
    ON conversations (session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_conversations_created
    ON conversations (created_at);
"#;

const SELECT_COLUMNS: &str = "conversation_id, session_id, user_message, agent_response, \
     skill_used, processing_time, metadata, created_at";

/// SQLite-backed store. Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        let open_path = db_path.clone();

        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            if let Some(parent) = open_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                }
            }
            let conn = Connection::open(&open_path)?;
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("Failed to spawn blocking task: {}", e)))??;

        tracing::info!("[SqliteStore] Opened conversation store at {:?}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(db_path),
        })
    }

    /// Private in-memory database, mainly for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn run_blocking<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection mutex poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(format!("Task execution failed: {}", e)))?
    }
}

/// Raw column values, decoded separately so a bad row can be reported instead of failing a query
struct RawRow {
    conversation_id: String,
    session_id: String,
    user_message: String,
    agent_response: String,
    skill_used: Option<String>,
    processing_time: f64,
    metadata: Option<String>,
    created_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            conversation_id: row.get(0)?,
            session_id: row.get(1)?,
            user_message: row.get(2)?,
            agent_response: row.get(3)?,
            skill_used: row.get(4)?,
            processing_time: row.get(5)?,
            metadata: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// Strict decoding used by scans
    fn decode(self) -> Result<ConversationRecord, MalformedRecord> {
        let malformed = |reason: String| MalformedRecord {
            conversation_id: self.conversation_id.clone(),
            reason,
        };

        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| malformed(format!("invalid conversation_id: {}", e)))?;
        let created_at = decode_timestamp(&self.created_at)
            .map_err(|e| malformed(format!("invalid created_at: {}", e)))?;
        let metadata = match &self.metadata {
            Some(raw) => Some(
                serde_json::from_str::<Metadata>(raw)
                    .map_err(|e| malformed(format!("invalid metadata: {}", e)))?,
            ),
            None => None,
        };
        if !self.processing_time.is_finite() || self.processing_time < 0.0 {
            return Err(malformed(format!(
                "invalid processing_time: {}",
                self.processing_time
            )));
        }

        Ok(ConversationRecord {
            conversation_id,
            session_id: self.session_id,
            user_message: self.user_message,
            agent_response: self.agent_response,
            skill_used: self.skill_used,
            processing_time: self.processing_time,
            metadata,
            created_at,
        })
    }

    /// Lenient decoding for history reads: unreadable metadata is dropped
    fn decode_lenient(mut self) -> StoreResult<ConversationRecord> {
        if let Some(raw) = &self.metadata {
            if serde_json::from_str::<Metadata>(raw).is_err() {
                tracing::warn!(
                    "[SqliteStore] Dropping unreadable metadata of conversation {}",
                    self.conversation_id
                );
                self.metadata = None;
            }
        }
        self.decode()
            .map_err(|m| StoreError::Database(format!("{}: {}", m.conversation_id, m.reason)))
    }
}

fn select_by_id(conn: &Connection, id: &str) -> StoreResult<Option<ConversationRecord>> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE conversation_id = ?1",
        SELECT_COLUMNS
    );
    conn.query_row(&sql, params![id], RawRow::from_row)
        .optional()?
        .map(RawRow::decode_lenient)
        .transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, draft: &ConversationDraft) -> StoreResult<Inserted> {
        let draft = draft.clone();
        let metadata = draft
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            let id = draft.conversation_id.to_string();

            let latest: Option<String> = tx.query_row(
                "SELECT MAX(created_at) FROM conversations WHERE session_id = ?1",
                params![draft.session_id],
                |row| row.get(0),
            )?;
            let latest = latest.as_deref().and_then(|raw| decode_timestamp(raw).ok());
            let created_at = next_created_at(latest);

            let changed = tx.execute(
                "INSERT OR IGNORE INTO conversations (
                    conversation_id, session_id, user_message, agent_response,
                    skill_used, processing_time, metadata, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    draft.session_id,
                    draft.user_message,
                    draft.agent_response,
                    draft.skill_used,
                    draft.processing_time,
                    metadata,
                    encode_timestamp(&created_at),
                ],
            )?;

            let record = select_by_id(&tx, &id)?.ok_or_else(|| {
                StoreError::Database(format!("conversation {} vanished after insert", id))
            })?;
            tx.commit()?;

            Ok(Inserted {
                record,
                fresh: changed == 1,
            })
        })
        .await
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ConversationRecord>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM conversations WHERE session_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![session_id, limit as i64, offset as i64],
                    RawRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawRow::decode_lenient).collect()
        })
        .await
    }

    async fn get(&self, conversation_id: Uuid) -> StoreResult<Option<ConversationRecord>> {
        let id = conversation_id.to_string();
        self.run_blocking(move |conn| select_by_id(conn, &id)).await
    }

    async fn summarize(&self, session_id: &str) -> StoreResult<Option<SessionSummary>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let (total, avg, first, last): (i64, Option<f64>, Option<String>, Option<String>) =
                conn.query_row(
                    "SELECT COUNT(*), AVG(processing_time), MIN(created_at), MAX(created_at)
                     FROM conversations WHERE session_id = ?1",
                    params![session_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;

            let (Some(first), Some(last)) = (first, last) else {
                return Ok(None);
            };
            if total == 0 {
                return Ok(None);
            }

            let decode = |raw: &str| {
                decode_timestamp(raw)
                    .map_err(|e| StoreError::Database(format!("invalid created_at: {}", e)))
            };
            Ok(Some(SessionSummary {
                session_id,
                total_conversations: total as u64,
                avg_processing_time: avg.unwrap_or(0.0),
                first_conversation_at: decode(&first)?,
                last_conversation_at: decode(&last)?,
            }))
        })
        .await
    }

    async fn scan(&self, since: Option<DateTime<Utc>>) -> StoreResult<Vec<ScannedRow>> {
        let since = since.map(|ts| encode_timestamp(&ts));
        self.run_blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM conversations WHERE ?1 IS NULL OR created_at >= ?1
                 ORDER BY created_at ASC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![since], |row| {
                    // Type mismatches surface here; keep them as malformed rows
                    Ok(RawRow::from_row(row).map_err(|e| MalformedRecord {
                        conversation_id: row
                            .get::<_, String>(0)
                            .unwrap_or_else(|_| "<unknown>".to_string()),
                        reason: e.to_string(),
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(|raw| raw.and_then(RawRow::decode))
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn draft(session: &str, message: &str, seconds: f64) -> ConversationDraft {
        ConversationDraft::new(session, message, format!("re: {}", message))
            .with_processing_time(seconds)
    }

    #[tokio::test]
    async fn test_insert_and_recent_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..3 {
            store.insert(&draft("s1", &format!("m{}", i), 0.1)).await.unwrap();
        }
        store.insert(&draft("s2", "other", 0.1)).await.unwrap();

        let recent = store.recent("s1", 10, 0).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|r| r.user_message.as_str()).collect();
        assert_eq!(messages, vec!["m2", "m1", "m0"]);
        assert!(recent[0].created_at > recent[1].created_at);

        let limited = store.recent("s1", 1, 0).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].user_message, "m2");
    }

    #[tokio::test]
    async fn test_metadata_round_trip_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut meta = Metadata::new();
        meta.insert("source".into(), json!({"kind": "test", "tags": [1, 2]}));
        let d = draft("s1", "hello", 1.5).with_skill("chat").with_metadata(meta.clone());

        let inserted = store.insert(&d).await.unwrap();
        assert!(inserted.fresh);

        let fetched = store.get(d.conversation_id).await.unwrap().unwrap();
        assert_eq!(fetched, inserted.record);
        assert_eq!(fetched.metadata, Some(meta));
        assert_eq!(fetched.skill_used.as_deref(), Some("chat"));

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let d = draft("s1", "hello", 1.0);

        let first = store.insert(&d).await.unwrap();
        let second = store.insert(&d).await.unwrap();

        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.record.created_at, second.record.created_at);
        assert_eq!(store.count("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_summarize() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.summarize("s1").await.unwrap().is_none());

        for seconds in [1.0, 2.0, 4.5] {
            store.insert(&draft("s1", "m", seconds)).await.unwrap();
        }

        let summary = store.summarize("s1").await.unwrap().unwrap();
        assert_eq!(summary.total_conversations, 3);
        assert!((summary.avg_processing_time - 2.5).abs() < 1e-9);
        assert!(summary.first_conversation_at < summary.last_conversation_at);
    }

    #[tokio::test]
    async fn test_scan_reports_malformed_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&draft("s1", "good", 1.0)).await.unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO conversations VALUES ('bad-id', 's1', 'u', 'a', NULL, 1.0, NULL, ?1)",
                params![encode_timestamp(&Utc::now())],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO conversations VALUES (?1, 's1', 'u', 'a', NULL, 1.0, '{not json', ?2)",
                params![Uuid::new_v4().to_string(), encode_timestamp(&Utc::now())],
            )
            .unwrap();
        }

        let rows = store.scan(None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.is_ok()).count(), 1);

        let bad: Vec<_> = rows.iter().filter_map(|r| r.as_ref().err()).collect();
        assert!(bad.iter().any(|m| m.conversation_id == "bad-id"));
        assert!(bad.iter().any(|m| m.reason.contains("metadata")));
    }

    #[tokio::test]
    async fn test_scan_since() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&draft("s1", "old", 1.0)).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::milliseconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.insert(&draft("s1", "new", 1.0)).await.unwrap();

        let rows = store.scan(Some(cutoff)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().unwrap().user_message, "new");
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("conversations.db");
        let d = draft("persist", "Persistent message", 0.3);

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).await.unwrap();
            store.insert(&d).await.unwrap();
        }

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).await.unwrap();
            let loaded = store.recent("persist", 10, 0).await.unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].user_message, "Persistent message");
            assert_eq!(store.path(), Some(path.as_path()));
        }
    }
}
