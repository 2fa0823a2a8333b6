//! Boundary facade
//!
//! Information Hiding:
//! - Store, cache backend and dispatcher wiring built once from `Settings`
//! - Redis connection failures degrade to an uncached deployment
//! - Callers see request/response values, never pipeline internals
//!
//! # Example
//! ```no_run
//! use convlog::{ConvLog, LogRequest, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let convlog = ConvLog::connect(Settings::new()?).await?;
//!     let response = convlog
//!         .log_conversation(LogRequest::new("s1", "Xin chào", "Chào bạn!"))
//!         .await;
//!     println!("{}", response.message);
//!     convlog.shutdown().await
//! }
//! ```

use crate::cache::{CacheBackend, CachePolicy, FastCache, InMemoryCache, RedisCache};
use crate::config::{CacheBackendKind, CacheConfig, Settings};
use crate::core::{ConversationDraft, ConversationRecord, Metadata, SessionSummary};
use crate::intercept::LoggingExecutor;
use crate::pipeline::{DiagnosticsSnapshot, LogDispatcherHandle, LogStatus, LoggingPipeline};
use crate::query::{GlobalStats, QueryService, StatsAggregator};
use crate::storage::{RecordStore, SqliteStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// One externally supplied turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRequest {
    pub session_id: String,
    pub user_message: String,
    pub agent_response: String,
    #[serde(default)]
    pub skill_used: Option<String>,
    /// Seconds; absent means 0.0
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Client-chosen id makes retries idempotent
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

impl LogRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        agent_response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_message: user_message.into(),
            agent_response: agent_response.into(),
            skill_used: None,
            processing_time: None,
            metadata: None,
            conversation_id: None,
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill_used = Some(skill.into());
        self
    }

    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = Some(seconds);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn into_draft(self) -> ConversationDraft {
        let mut draft =
            ConversationDraft::new(self.session_id, self.user_message, self.agent_response)
                .with_processing_time(self.processing_time.unwrap_or(0.0));
        draft.skill_used = self.skill_used;
        draft.metadata = self.metadata;
        if let Some(id) = self.conversation_id {
            draft = draft.with_conversation_id(id);
        }
        draft
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogResponse {
    pub success: bool,
    pub session_id: String,
    pub conversation_id: Uuid,
    pub status: LogStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub conversations: Vec<ConversationRecord>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub session_id: String,
    pub summary: Option<SessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: GlobalStats,
    pub logging: DiagnosticsSnapshot,
    pub cache_backend: String,
}

/// Process-wide logging context. Build once, share by reference or `Arc`.
pub struct ConvLog {
    cache: FastCache,
    pipeline: Arc<LoggingPipeline>,
    dispatcher: LogDispatcherHandle,
    queries: QueryService,
    stats: StatsAggregator,
    cache_backend: &'static str,
}

impl ConvLog {
    /// Open the SQLite store and the configured cache backend
    pub async fn connect(settings: Settings) -> Result<Self> {
        let store = SqliteStore::open(&settings.database.path, settings.database.busy_timeout())
            .await
            .with_context(|| format!("Failed to open record store at {}", settings.database.path))?;
        tracing::info!("[ConvLog] Record store ready at {}", settings.database.path);

        let cache = build_cache(&settings.cache).await;
        Ok(Self::from_parts(Arc::new(store), cache, &settings))
    }

    /// Assemble from already built parts. Must run inside a tokio runtime.
    pub fn from_parts(store: Arc<dyn RecordStore>, cache: FastCache, settings: &Settings) -> Self {
        let pipeline = Arc::new(
            LoggingPipeline::new(store.clone(), cache.clone())
                .with_write_retries(settings.database.write_retries),
        );
        let dispatcher = LogDispatcherHandle::new(pipeline.clone(), &settings.dispatcher);
        let cache_backend = if cache.is_enabled() {
            match settings.cache.backend {
                CacheBackendKind::Redis => "redis",
                _ => "memory",
            }
        } else {
            "disabled"
        };

        Self {
            queries: QueryService::new(store.clone(), cache.clone()),
            stats: StatsAggregator::new(store),
            cache,
            pipeline,
            dispatcher,
            cache_backend,
        }
    }

    /// Wrap an agent so each invocation is logged in the background
    pub fn wrap<E>(&self, executor: E) -> LoggingExecutor<E> {
        LoggingExecutor::new(executor, self.dispatcher.clone())
    }

    pub fn dispatcher(&self) -> LogDispatcherHandle {
        self.dispatcher.clone()
    }

    pub fn cache(&self) -> &FastCache {
        &self.cache
    }

    /// Log synchronously and report the outcome. Never returns an error.
    pub async fn log_conversation(&self, request: LogRequest) -> LogResponse {
        let session_id = request.session_id.clone();
        let outcome = self.pipeline.log(request.into_draft()).await;

        let message = match (&outcome.status, outcome.diagnostic()) {
            (LogStatus::Logged, _) => "Conversation logged successfully".to_string(),
            (LogStatus::Duplicate, _) => "Conversation already logged".to_string(),
            (_, Some(diagnostic)) => diagnostic.to_string(),
            (status, None) => format!("{:?}", status),
        };

        LogResponse {
            success: outcome.is_success(),
            session_id,
            conversation_id: outcome.conversation_id,
            status: outcome.status,
            message,
        }
    }

    pub async fn history(&self, session_id: &str, limit: usize) -> Result<HistoryResponse> {
        self.history_page(session_id, limit, 0).await
    }

    pub async fn history_page(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<HistoryResponse> {
        let conversations = self
            .queries
            .get_history_page(session_id, limit, offset)
            .await
            .with_context(|| format!("Failed to load history for session {}", session_id))?;

        Ok(HistoryResponse {
            session_id: session_id.to_string(),
            count: conversations.len(),
            conversations,
        })
    }

    pub async fn summary(&self, session_id: &str) -> Result<SummaryResponse> {
        let summary = self
            .queries
            .get_summary(session_id)
            .await
            .with_context(|| format!("Failed to summarize session {}", session_id))?;

        Ok(SummaryResponse {
            session_id: session_id.to_string(),
            summary,
        })
    }

    pub async fn stats(&self) -> Result<StatsResponse> {
        self.stats_since(None).await
    }

    pub async fn stats_since(&self, since: Option<DateTime<Utc>>) -> Result<StatsResponse> {
        let stats = self
            .stats
            .stats_since(since)
            .await
            .context("Failed to compute conversation stats")?;

        Ok(StatsResponse {
            stats,
            logging: self.diagnostics(),
            cache_backend: self.cache_backend.to_string(),
        })
    }

    pub async fn conversation(&self, conversation_id: Uuid) -> Result<Option<ConversationRecord>> {
        self.queries
            .get_conversation(conversation_id)
            .await
            .with_context(|| format!("Failed to load conversation {}", conversation_id))
    }

    /// Log a canned greeting turn under a fresh session
    pub async fn test_log(&self) -> LogResponse {
        let mut metadata = Metadata::new();
        metadata.insert("test".into(), json!(true));
        metadata.insert("source".into(), json!("test-endpoint"));

        let request = LogRequest::new(
            Uuid::new_v4().to_string(),
            "Xin chào, bạn có thể giúp tôi không?",
            "Chào bạn! Tôi có thể giúp bạn với các câu hỏi về chat tổng quát hoặc thời tiết.",
        )
        .with_skill("chat")
        .with_processing_time(1.5)
        .with_metadata(metadata);

        self.log_conversation(request).await
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.pipeline.diagnostics().snapshot()
    }

    /// Wait for background logging dispatched so far
    pub async fn flush(&self) -> Result<()> {
        self.dispatcher.flush().await
    }

    /// Drain background logging and stop the dispatcher
    pub async fn shutdown(&self) -> Result<()> {
        self.dispatcher.shutdown().await?;
        tracing::info!("[ConvLog] Shutdown complete");
        Ok(())
    }
}

/// Build the configured cache. An unreachable Redis is not fatal: the
/// deployment runs uncached and every read goes to the store.
pub async fn build_cache(config: &CacheConfig) -> FastCache {
    let policy = CachePolicy::from(config);
    let backend: Arc<dyn CacheBackend> = match config.backend {
        CacheBackendKind::Disabled => {
            tracing::info!("[ConvLog] Cache disabled");
            return FastCache::disabled();
        }
        CacheBackendKind::Memory => Arc::new(InMemoryCache::new()),
        CacheBackendKind::Redis => {
            let connected = match RedisCache::connect(config).await {
                Ok(cache) => cache.ping().await.map(|_| cache),
                Err(e) => Err(e),
            };
            match connected {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    tracing::warn!(
                        "[ConvLog] Redis at {}:{} unavailable, running without cache: {}",
                        config.host,
                        config.port,
                        e
                    );
                    return FastCache::disabled();
                }
            }
        }
    };
    FastCache::new(backend, policy)
}

/// Bulk logging of externally supplied turns
pub mod batch {
    use super::*;
    use futures::stream::{self, StreamExt};

    /// Log every request with at most `concurrency` in flight. Results come
    /// back in input order.
    pub async fn log_batch(
        convlog: &ConvLog,
        requests: Vec<LogRequest>,
        concurrency: usize,
    ) -> Vec<LogResponse> {
        let mut results: Vec<(usize, LogResponse)> = stream::iter(requests.into_iter().enumerate())
            .map(|(i, request)| async move { (i, convlog.log_conversation(request).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, response)| response).collect()
    }

    /// Parse JSON lines into requests; blank lines are skipped
    pub fn parse_lines(input: &str) -> Vec<(usize, Result<LogRequest, serde_json::Error>)> {
        input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| (n + 1, serde_json::from_str(line)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn in_memory() -> ConvLog {
        let settings = Settings::default();
        ConvLog::from_parts(
            Arc::new(InMemoryStore::new()),
            FastCache::new(Arc::new(InMemoryCache::new()), CachePolicy::default()),
            &settings,
        )
    }

    #[tokio::test]
    async fn test_log_then_read_back() {
        let convlog = in_memory();
        let response = convlog
            .log_conversation(
                LogRequest::new("s1", "Xin chào", "Chào bạn!")
                    .with_skill("chat")
                    .with_processing_time(1.5),
            )
            .await;
        assert!(response.success);
        assert_eq!(response.status, LogStatus::Logged);

        let history = convlog.history("s1", 10).await.unwrap();
        assert_eq!(history.count, 1);
        assert_eq!(history.conversations[0].conversation_id, response.conversation_id);

        let summary = convlog.summary("s1").await.unwrap().summary.unwrap();
        assert_eq!(summary.total_conversations, 1);
        assert!((summary.avg_processing_time - 1.5).abs() < 1e-9);

        let record = convlog.conversation(response.conversation_id).await.unwrap();
        assert_eq!(record.unwrap().agent_response, "Chào bạn!");
    }

    #[tokio::test]
    async fn test_invalid_request_reports_failure() {
        let convlog = in_memory();
        let response = convlog
            .log_conversation(LogRequest::new("", "q", "a"))
            .await;
        assert!(!response.success);
        assert_eq!(response.status, LogStatus::Failed);
        assert_eq!(convlog.diagnostics().failed, 1);
    }

    #[tokio::test]
    async fn test_test_log_uses_fresh_session() {
        let convlog = in_memory();
        let first = convlog.test_log().await;
        let second = convlog.test_log().await;
        assert!(first.success);
        assert_ne!(first.session_id, second.session_id);

        let history = convlog.history(&first.session_id, 1).await.unwrap();
        let record = &history.conversations[0];
        assert_eq!(record.skill_used.as_deref(), Some("chat"));
        assert_eq!(record.metadata.as_ref().unwrap()["source"], json!("test-endpoint"));
    }

    #[tokio::test]
    async fn test_stats_include_logging_diagnostics() {
        let convlog = in_memory();
        convlog.test_log().await;
        let request = LogRequest {
            conversation_id: Some(Uuid::new_v4()),
            ..LogRequest::new("s1", "q", "a")
        };
        convlog.log_conversation(request.clone()).await;
        let duplicate = convlog.log_conversation(request).await;
        assert_eq!(duplicate.status, LogStatus::Duplicate);

        let stats = convlog.stats().await.unwrap();
        assert_eq!(stats.stats.total_records, 2);
        assert_eq!(stats.logging.duplicates, 1);
        assert_eq!(stats.cache_backend, "memory");
    }

    #[tokio::test]
    async fn test_disabled_cache_kind() {
        let config = CacheConfig {
            backend: CacheBackendKind::Disabled,
            ..CacheConfig::default()
        };
        assert!(!build_cache(&config).await.is_enabled());
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let convlog = in_memory();
        let requests: Vec<_> = (0..10)
            .map(|i| LogRequest::new("batch", format!("m{}", i), "ok"))
            .chain(std::iter::once(LogRequest::new("", "bad", "ok")))
            .collect();

        let responses = batch::log_batch(&convlog, requests, 4).await;
        assert_eq!(responses.len(), 11);
        assert!(responses[..10].iter().all(|r| r.success));
        assert!(!responses[10].success);
        assert_eq!(convlog.history("batch", 50).await.unwrap().count, 10);
    }

    #[test]
    fn test_parse_lines() {
        let input = r#"{"session_id":"s1","user_message":"q","agent_response":"a","processing_time":0.4}

not json
{"session_id":"s2","user_message":"q","agent_response":"a","skill_used":"weather"}"#;
        let parsed = batch::parse_lines(input);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].0, 1);
        assert_eq!(parsed[0].1.as_ref().unwrap().processing_time, Some(0.4));
        assert_eq!(parsed[1].0, 3);
        assert!(parsed[1].1.is_err());
        assert_eq!(
            parsed[2].1.as_ref().unwrap().skill_used.as_deref(),
            Some("weather")
        );
    }
}
