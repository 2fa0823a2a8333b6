//! Read paths: per-session history and summaries, global statistics
//!
//! Information Hiding:
//! - Cache-first / store-fallback policy hidden from callers
//! - Cache backfill after a fallback read internalized
//! - Aggregation scan and malformed-row accounting hidden in `stats`

pub mod service;
pub mod stats;

pub use service::QueryService;
pub use stats::{DailyStats, GlobalStats, StatsAggregator};
