use crate::core::errors::{Result, StepflowError};
use crate::session::{SessionState, StepId};
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Why the handler is being invoked this iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepVisit {
    /// Regular sequential step
    Step(StepId),
    /// Pre-empting visit to work off the verification backlog
    Verification,
    /// The review step, entered only after the barrier opened
    Review(StepId),
}

/// Read-only view handed to a handler for one visit
pub struct StepContext<'a> {
    pub state: &'a SessionState,
    pub visit: StepVisit,
    pub input: &'a Value,
}

impl<'a> StepContext<'a> {
    /// Head of the verification queue together with what the extraction
    /// produced for it: `(document_type, fields, failure_reason)`
    pub fn pending_verification(&self) -> Option<(&str, Option<&Value>, Option<&str>)> {
        let doc_type = self.state.verification_queue.front()?;
        Some((
            doc_type.as_str(),
            self.state.extracted_data.get(doc_type),
            self.state
                .extraction_failures
                .get(doc_type)
                .map(String::as_str),
        ))
    }

    pub fn answer_for(&self, step: StepId) -> Option<&Value> {
        self.state.journey_data.get(&step)
    }
}

/// Request to extract one submitted document in the background
#[derive(Debug, Clone)]
pub struct DocumentSubmission {
    /// Generated when absent
    pub document_id: Option<String>,
    pub document_type: String,
    pub raw_input: Value,
}

impl DocumentSubmission {
    pub fn new<S: Into<String>>(document_type: S, raw_input: Value) -> Self {
        Self {
            document_id: None,
            document_type: document_type.into(),
            raw_input,
        }
    }

    pub fn with_id<S: Into<String>>(mut self, document_id: S) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

/// How a verification visit settled the queue head
#[derive(Debug, Clone)]
pub struct VerificationResolution {
    pub document_type: String,
    /// Field corrections to merge over the extracted data
    pub corrections: Option<Value>,
}

impl VerificationResolution {
    pub fn confirm<S: Into<String>>(document_type: S) -> Self {
        Self {
            document_type: document_type.into(),
            corrections: None,
        }
    }

    pub fn correct<S: Into<String>>(document_type: S, corrections: Value) -> Self {
        Self {
            document_type: document_type.into(),
            corrections: Some(corrections),
        }
    }
}

/// What a handler visit produced. The engine applies this to the session;
/// handlers never mutate state themselves.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Captured answer, recorded under the current step id
    pub answer: Option<Value>,
    /// Documents to hand to the extraction runner, fire-and-forget
    pub submissions: Vec<DocumentSubmission>,
    /// Settles the verification queue head; meaningful only on
    /// verification visits
    pub resolution: Option<VerificationResolution>,
    /// Marks the session finished after this visit
    pub finish: bool,
}

impl StepOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn answer(value: Value) -> Self {
        Self {
            answer: Some(value),
            ..Self::default()
        }
    }

    pub fn resolved(resolution: VerificationResolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..Self::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            finish: true,
            ..Self::default()
        }
    }

    pub fn with_submission(mut self, submission: DocumentSubmission) -> Self {
        self.submissions.push(submission);
        self
    }
}

#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    /// Returns the handler's unique name.
    fn name(&self) -> String;

    /// Returns a human-readable description of the handler's purpose.
    fn description(&self) -> String {
        "No description provided".to_string()
    }

    /// Executes one visit. Invoked at most once per engine iteration;
    /// re-entrancy is not required.
    async fn execute(&self, ctx: StepContext<'_>) -> AnyResult<StepOutcome>;
}

/// Ordered mapping from step id to handler, plus the verification
/// handler slot and the review-step marker.
pub struct StepRegistry {
    handlers: BTreeMap<StepId, Arc<dyn StepHandler>>,
    verification: Option<Arc<dyn StepHandler>>,
    review_step: Option<StepId>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            verification: None,
            review_step: None,
        }
    }

    pub fn register(&mut self, step: StepId, handler: Arc<dyn StepHandler>) -> Result<()> {
        if step == 0 {
            return Err(StepflowError::validation("step ids start at 1"));
        }
        if self.handlers.contains_key(&step) {
            return Err(StepflowError::validation(format!(
                "handler already registered for step {}",
                step
            )));
        }
        self.handlers.insert(step, handler);
        Ok(())
    }

    pub fn set_verification_handler(&mut self, handler: Arc<dyn StepHandler>) {
        self.verification = Some(handler);
    }

    /// Mark the step whose entry requires all background work settled
    pub fn set_review_step(&mut self, step: StepId) {
        self.review_step = Some(step);
    }

    pub fn contains(&self, step: StepId) -> bool {
        self.handlers.contains_key(&step)
    }

    pub fn get(&self, step: StepId) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step).cloned()
    }

    pub fn verification_handler(&self) -> Option<Arc<dyn StepHandler>> {
        self.verification.clone()
    }

    pub fn review_step(&self) -> Option<StepId> {
        self.review_step
    }

    pub fn last_step(&self) -> Option<StepId> {
        self.handlers.keys().next_back().copied()
    }

    pub fn step_names(&self) -> Vec<(StepId, String)> {
        self.handlers
            .iter()
            .map(|(step, handler)| (*step, handler.name()))
            .collect()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
