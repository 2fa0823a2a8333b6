//! Redis Cache Backend
//!
//! Information Hiding:
//! - Key layout and JSON payload encoding hidden from cache users
//! - Multi-step list updates sent as one MULTI/EXEC pipeline
//! - Reconnection handled by the shared ConnectionManager

use super::{CacheBackend, CacheError, CacheResult};
use crate::config::CacheConfig;
use crate::core::{ConversationRecord, SessionSummary};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

const KEY_PREFIX: &str = "convlog";

fn recent_key(session_id: &str) -> String {
    format!("{}:recent:{}", KEY_PREFIX, session_id)
}

fn summary_key(session_id: &str) -> String {
    format!("{}:session_summary:{}", KEY_PREFIX, session_id)
}

fn conversation_key(conversation_id: Uuid) -> String {
    format!("{}:conversation:{}", KEY_PREFIX, conversation_id)
}

/// Build a `redis://` URL from the configured connection parameters
pub fn connection_url(config: &CacheConfig) -> String {
    let auth = match (&config.username, &config.password) {
        (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
        (None, Some(pass)) => format!(":{}@", pass),
        (Some(user), None) => format!("{}@", user),
        (None, None) => String::new(),
    };
    format!("redis://{}{}:{}/{}", auth, config.host, config.port, config.db)
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Redis-backed cache sharing one multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(connection_url(config))?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(
            "[RedisCache] Connected to {}:{} (db {})",
            config.host,
            config.port,
            config.db
        );
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(CacheError::Unavailable(format!("unexpected PING reply: {}", pong)));
        }
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(CacheError::from)
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> CacheResult<Option<Vec<ConversationRecord>>> {
        if limit == 0 {
            return Ok(Some(Vec::new()));
        }
        let key = recent_key(session_id);
        let mut conn = self.conn.clone();
        let (exists, raw): (bool, Vec<String>) = redis::pipe()
            .cmd("EXISTS")
            .arg(&key)
            .cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await?;

        if !exists {
            return Ok(None);
        }
        let records = raw
            .iter()
            .map(|item| serde_json::from_str(item))
            .collect::<Result<Vec<ConversationRecord>, _>>()?;
        Ok(Some(records))
    }

    async fn push_recent(
        &self,
        session_id: &str,
        record: &ConversationRecord,
        capacity: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let key = recent_key(session_id);
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(capacity.max(1) as i64 - 1)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_secs(ttl))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn replace_recent(
        &self,
        session_id: &str,
        records: &[ConversationRecord],
        ttl: Duration,
    ) -> CacheResult<()> {
        let key = recent_key(session_id);
        let payloads = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&key).ignore();
        if !payloads.is_empty() {
            // RPUSH keeps the given newest-first order
            pipe.cmd("RPUSH")
                .arg(&key)
                .arg(payloads)
                .ignore()
                .cmd("EXPIRE")
                .arg(&key)
                .arg(ttl_secs(ttl))
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn remove_recent(&self, session_id: &str) -> CacheResult<()> {
        self.delete(&recent_key(session_id)).await
    }

    async fn summary(&self, session_id: &str) -> CacheResult<Option<SessionSummary>> {
        self.get_json(&summary_key(session_id)).await
    }

    async fn put_summary(&self, summary: &SessionSummary, ttl: Duration) -> CacheResult<()> {
        self.set_json(&summary_key(&summary.session_id), summary, ttl)
            .await
    }

    async fn remove_summary(&self, session_id: &str) -> CacheResult<()> {
        self.delete(&summary_key(session_id)).await
    }

    async fn conversation(
        &self,
        conversation_id: Uuid,
    ) -> CacheResult<Option<ConversationRecord>> {
        self.get_json(&conversation_key(conversation_id)).await
    }

    async fn put_conversation(
        &self,
        record: &ConversationRecord,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.set_json(&conversation_key(record.conversation_id), record, ttl)
            .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
