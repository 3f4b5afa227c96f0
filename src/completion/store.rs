use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Result of one extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompletionOutcome {
    Success { fields: Value },
    Failure { reason: String },
}

impl CompletionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn fields(&self) -> Option<&Value> {
        match self {
            Self::Success { fields } => Some(fields),
            Self::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason } => Some(reason),
        }
    }
}

/// One finished extraction. Produced exactly once by a worker, consumed
/// exactly once by the engine's drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub session_id: String,
    pub document_id: String,
    pub document_type: String,
    pub outcome: CompletionOutcome,
    pub completed_at: NaiveDateTime,
}

/// Concurrent store of finished extraction results, keyed by session.
///
/// Workers `put`, the engine `drain`s. Constructed once at process start
/// and shared between the worker pool and the engine. Entries for one
/// session keep FIFO arrival order.
#[derive(Debug, Default)]
pub struct CompletionStore {
    entries: Arc<DashMap<String, Vec<CompletionEntry>>>,
}

impl Clone for CompletionStore {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl CompletionStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Non-blocking publish from any worker
    pub fn put(&self, entry: CompletionEntry) {
        debug!(
            session_id = %entry.session_id,
            document_id = %entry.document_id,
            success = entry.outcome.is_success(),
            "Completion stored"
        );
        self.entries
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry);
    }

    /// Atomically remove and return all entries for a session, in arrival
    /// order. A second drain with no intervening put returns empty.
    pub fn drain(&self, session_id: &str) -> Vec<CompletionEntry> {
        self.entries
            .remove(session_id)
            .map(|(_, entries)| entries)
            .unwrap_or_default()
    }

    /// Drop any entries for a retired session, returning how many were
    /// discarded
    pub fn discard(&self, session_id: &str) -> usize {
        let dropped = self
            .entries
            .remove(session_id)
            .map(|(_, entries)| entries.len())
            .unwrap_or(0);
        if dropped > 0 {
            debug!(session_id, dropped, "Discarded completions for finished session");
        }
        dropped
    }

    /// Entries currently waiting to be drained for a session
    pub fn len(&self, session_id: &str) -> usize {
        self.entries.get(session_id).map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }
}
