pub mod record;

pub use record::{
    ConversationDraft, ConversationRecord, DraftError, Metadata, SessionSummary, ERROR_SKILL,
};
