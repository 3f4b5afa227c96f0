use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Numbered position in the linear journey, 1..=N
pub type StepId = u32;

/// Lifecycle of one submitted document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
}

/// How a session ended. `Completed` is the only clean finish; the other
/// two are forced terminations and callers are expected to treat them as
/// incomplete runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Completed,
    GuardExceeded,
    BarrierTimeout,
}

/// Logical engine phase, derived from session fields rather than stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Running,
    AwaitingVerification,
    Reviewing,
    Finished,
}

/// Per-session record and single source of truth.
///
/// Mutated exclusively by the engine; background workers publish results
/// through the completion store and never touch this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Position in the linear sequence; verification routing may pre-empt
    /// it without changing it
    pub current_step: StepId,
    /// Incremented once per engine iteration, including barrier polls
    pub step_count_guard: u32,
    /// Set at most once, never unset
    pub finished: bool,
    pub finish_reason: Option<FinishReason>,
    /// Captured answer per step id, append-only
    pub journey_data: BTreeMap<StepId, Value>,
    /// Extracted fields per document type, populated only by draining
    /// the completion store
    pub extracted_data: HashMap<String, Value>,
    /// Failure reason per document type for extractions that failed
    pub extraction_failures: HashMap<String, String>,
    /// Document ids submitted but not yet completed
    pub pending_documents: HashSet<String>,
    /// Document types awaiting verification, FIFO by completion arrival
    pub verification_queue: VecDeque<String>,
    pub document_status: HashMap<String, DocumentStatus>,
    /// Consecutive verification visits that left the queue unchanged
    pub stalled_verifications: u32,
    pub created_at: NaiveDateTime,
}

impl SessionState {
    pub fn new<S: Into<String>>(session_id: S) -> Self {
        Self {
            session_id: session_id.into(),
            current_step: 1,
            step_count_guard: 0,
            finished: false,
            finish_reason: None,
            journey_data: BTreeMap::new(),
            extracted_data: HashMap::new(),
            extraction_failures: HashMap::new(),
            pending_documents: HashSet::new(),
            verification_queue: VecDeque::new(),
            document_status: HashMap::new(),
            stalled_verifications: 0,
            created_at: Utc::now().naive_utc(),
        }
    }

    /// Derive the logical phase. `review_step` is the step the registry
    /// marked as the barrier point, if any.
    pub fn phase(&self, review_step: Option<StepId>) -> SessionPhase {
        if self.finished {
            return SessionPhase::Finished;
        }
        if !self.verification_queue.is_empty() {
            return SessionPhase::AwaitingVerification;
        }
        if review_step == Some(self.current_step) {
            return SessionPhase::Reviewing;
        }
        SessionPhase::Running
    }

    /// True when no extraction work remains outstanding for this session
    pub fn extraction_settled(&self) -> bool {
        self.pending_documents.is_empty() && self.verification_queue.is_empty()
    }

    /// Projection of the externally observable fields a caller would
    /// persist to checkpoint and resume a session
    pub fn checkpoint(&self) -> SessionCheckpoint {
        SessionCheckpoint {
            session_id: self.session_id.clone(),
            current_step: self.current_step,
            finished: self.finished,
            finish_reason: self.finish_reason,
            verification_queue: self.verification_queue.iter().cloned().collect(),
            document_status: self.document_status.clone(),
        }
    }
}

/// Minimum observable fields for checkpoint/resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session_id: String,
    pub current_step: StepId,
    pub finished: bool,
    pub finish_reason: Option<FinishReason>,
    pub verification_queue: Vec<String>,
    pub document_status: HashMap<String, DocumentStatus>,
}
