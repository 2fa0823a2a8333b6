//! Per-session write epochs
//!
//! Writers advance a session's epoch after committing and before touching
//! the cache. A reader that filled the cache from a store read checks the
//! epoch it saw before that read; if it moved, the fill may predate a write
//! and is dropped. Sessions hash into a fixed set of slots, so collisions
//! only cost an extra cache miss.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

const SLOTS: usize = 1024;

pub struct SessionEpochs {
    slots: Vec<AtomicU64>,
}

impl SessionEpochs {
    pub fn new() -> Self {
        Self {
            slots: (0..SLOTS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn slot(&self, session_id: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.slots[(hasher.finish() as usize) % self.slots.len()]
    }

    pub fn current(&self, session_id: &str) -> u64 {
        self.slot(session_id).load(Ordering::SeqCst)
    }

    pub fn advance(&self, session_id: &str) {
        self.slot(session_id).fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for SessionEpochs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_only_that_session() {
        let epochs = SessionEpochs::new();
        let before = epochs.current("s1");
        epochs.advance("s1");
        assert_eq!(epochs.current("s1"), before + 1);
        assert_eq!(epochs.current("s1"), epochs.current("s1"));
    }
}
