//! Conversation records and derived session summaries
//!
//! Information Hiding:
//! - Timestamp encoding used by the durable store hidden behind helpers
//! - Draft validation rules internalized
//! - Summary arithmetic kept next to the data it derives from

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Open key-value metadata attached to a turn.
/// Persisted as an opaque JSON blob and only parsed at the boundary.
pub type Metadata = Map<String, Value>;

/// Skill label recorded for turns whose agent execution failed
pub const ERROR_SKILL: &str = "error";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DraftError {
    #[error("session_id must not be empty")]
    EmptySession,

    #[error("processing_time must be a finite, non-negative number of seconds (got {0})")]
    InvalidProcessingTime(f64),
}

/// A turn that has not been persisted yet.
///
/// Everything except `created_at`, which the record store assigns when the
/// row is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDraft {
    pub conversation_id: Uuid,
    pub session_id: String,
    pub user_message: String,
    pub agent_response: String,
    pub skill_used: Option<String>,
    pub processing_time: f64,
    pub metadata: Option<Metadata>,
}

impl ConversationDraft {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        agent_response: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_message: user_message.into(),
            agent_response: agent_response.into(),
            skill_used: None,
            processing_time: 0.0,
            metadata: None,
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill_used = Some(skill.into());
        self
    }

    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.session_id.trim().is_empty() {
            return Err(DraftError::EmptySession);
        }
        if !self.processing_time.is_finite() || self.processing_time < 0.0 {
            return Err(DraftError::InvalidProcessingTime(self.processing_time));
        }
        Ok(())
    }

    /// Seal the draft into a committed record
    pub fn commit(self, created_at: DateTime<Utc>) -> ConversationRecord {
        ConversationRecord {
            conversation_id: self.conversation_id,
            session_id: self.session_id,
            user_message: self.user_message,
            agent_response: self.agent_response,
            skill_used: self.skill_used,
            processing_time: self.processing_time,
            metadata: self.metadata,
            created_at,
        }
    }
}

/// One persisted turn. Never mutated after the store commits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: Uuid,
    pub session_id: String,
    pub user_message: String,
    pub agent_response: String,
    pub skill_used: Option<String>,
    pub processing_time: f64,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Failed agent turns are tagged either by skill or by an `error` metadata key
    pub fn is_error(&self) -> bool {
        self.skill_used.as_deref() == Some(ERROR_SKILL)
            || self
                .metadata
                .as_ref()
                .map(|m| m.contains_key("error"))
                .unwrap_or(false)
    }

    /// True when both describe the same turn, ignoring the commit timestamp
    pub fn same_content(&self, draft: &ConversationDraft) -> bool {
        self.conversation_id == draft.conversation_id
            && self.session_id == draft.session_id
            && self.user_message == draft.user_message
            && self.agent_response == draft.agent_response
            && self.skill_used == draft.skill_used
            && self.processing_time == draft.processing_time
            && self.metadata == draft.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_conversations: u64,
    pub avg_processing_time: f64,
    pub first_conversation_at: DateTime<Utc>,
    pub last_conversation_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Fold a session's records into a summary. `None` for an empty session.
    pub fn from_records<'a, I>(session_id: &str, records: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a ConversationRecord>,
    {
        let mut total = 0u64;
        let mut sum = 0.0f64;
        let mut first: Option<DateTime<Utc>> = None;
        let mut last: Option<DateTime<Utc>> = None;

        for record in records {
            total += 1;
            sum += record.processing_time;
            first = Some(first.map_or(record.created_at, |t| t.min(record.created_at)));
            last = Some(last.map_or(record.created_at, |t| t.max(record.created_at)));
        }

        Some(Self {
            session_id: session_id.to_string(),
            total_conversations: total,
            avg_processing_time: sum / total.max(1) as f64,
            first_conversation_at: first?,
            last_conversation_at: last?,
        })
    }
}

/// Fixed-width RFC 3339 (microseconds, `Z` suffix) so lexical order matches time order
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

/// Truncate to the precision the store keeps
pub fn storage_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::SubsecRound;
    ts.trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record_at(secs: i64, processing_time: f64) -> ConversationRecord {
        ConversationDraft::new("s1", "hi", "hello")
            .with_processing_time(processing_time)
            .commit(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_validate_rejects_empty_session() {
        let draft = ConversationDraft::new("  ", "hi", "hello");
        assert_eq!(draft.validate(), Err(DraftError::EmptySession));
    }

    #[test]
    fn test_validate_rejects_negative_and_nan_processing_time() {
        let draft = ConversationDraft::new("s1", "hi", "hello").with_processing_time(-0.5);
        assert!(matches!(
            draft.validate(),
            Err(DraftError::InvalidProcessingTime(_))
        ));

        let draft = ConversationDraft::new("s1", "hi", "hello").with_processing_time(f64::NAN);
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_summary_from_records() {
        let records = vec![record_at(100, 1.0), record_at(300, 2.0), record_at(200, 3.0)];
        let summary = SessionSummary::from_records("s1", &records).unwrap();

        assert_eq!(summary.total_conversations, 3);
        assert!((summary.avg_processing_time - 2.0).abs() < 1e-9);
        assert_eq!(summary.first_conversation_at.timestamp(), 100);
        assert_eq!(summary.last_conversation_at.timestamp(), 300);
    }

    #[test]
    fn test_summary_of_empty_session_is_none() {
        let records: Vec<ConversationRecord> = vec![];
        assert!(SessionSummary::from_records("s1", &records).is_none());
    }

    #[test]
    fn test_is_error() {
        let ok = record_at(1, 0.1);
        assert!(!ok.is_error());

        let by_skill = ConversationDraft::new("s1", "hi", "Error: boom")
            .with_skill(ERROR_SKILL)
            .commit(Utc::now());
        assert!(by_skill.is_error());

        let mut meta = Metadata::new();
        meta.insert("error".into(), json!("timeout"));
        let by_meta = ConversationDraft::new("s1", "hi", "")
            .with_metadata(meta)
            .commit(Utc::now());
        assert!(by_meta.is_error());
    }

    #[test]
    fn test_timestamp_encoding_is_sortable() {
        let a = Utc.timestamp_opt(1_700_000_000, 5_000).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 120_000_000).unwrap();
        let (ea, eb) = (encode_timestamp(&a), encode_timestamp(&b));

        assert_eq!(ea.len(), eb.len());
        assert!(ea < eb);
        assert_eq!(decode_timestamp(&ea).unwrap(), a);
    }

    #[test]
    fn test_storage_precision_drops_nanos() {
        let ts = Utc.timestamp_opt(10, 123_456_789).unwrap();
        let truncated = storage_precision(ts);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(decode_timestamp(&encode_timestamp(&truncated)).unwrap(), truncated);
    }

    #[test]
    fn test_same_content_sees_processing_time() {
        let draft = ConversationDraft::new("s1", "hi", "hello").with_processing_time(1.5);
        let record = draft.clone().commit(Utc::now());
        assert!(record.same_content(&draft));

        let slower = draft.with_processing_time(2.5);
        assert!(!record.same_content(&slower));
    }
}
