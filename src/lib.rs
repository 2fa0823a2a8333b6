//! convlog - Transparent conversation logging and caching for LLM agents
//!
//! Every agent turn is captured by a wrapping executor, written durably to
//! SQLite, and mirrored into a fast cache that serves per-session history
//! and summaries.

pub mod cache;
pub mod config;
pub mod core;
pub mod intercept;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod utils;

pub mod api;
pub mod cli;

pub use api::*;
pub use config::Settings;

pub use core::{ConversationDraft, ConversationRecord, Metadata, SessionSummary};
pub use intercept::{AgentExecutor, AgentRequest, LoggingExecutor, StreamingAgentExecutor};
pub use pipeline::{LogOutcome, LogStatus};
pub use query::{DailyStats, GlobalStats};
