use crate::completion::{CompletionOutcome, CompletionStore};
use crate::core::errors::{Result, StepflowError};
use crate::core::limits::EngineConfig;
use crate::extraction::{
    DocumentExtractor, ExtractionRequest, ExtractionTaskRunner, TemplateExtractor,
};
use crate::routing::{
    decide, DocumentSubmission, Route, StepContext, StepHandler, StepRegistry, StepVisit,
};
use crate::session::{
    DocumentStatus, FinishReason, SessionCheckpoint, SessionState, StepId,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot returned from one foreground iteration
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub state: SessionState,
    pub is_finished: bool,
}

impl From<&SessionState> for AdvanceOutcome {
    fn from(state: &SessionState) -> Self {
        Self {
            state: state.clone(),
            is_finished: state.finished,
        }
    }
}

/// What the review barrier decided for this iteration
enum BarrierResult {
    /// No outstanding work; run the review handler
    Open,
    /// Completions arrived mid-wait; run verification instead
    Preempted,
    /// Guard exhausted while waiting; the session is finished
    TimedOut,
}

/// Orchestrator for sequential journeys with background extraction.
///
/// One `advance` call is one foreground iteration: route, invoke the
/// routed handler, apply its outcome, drain completions, route again.
/// The whole iteration runs under a per-session mutex, so iterations for
/// one session never overlap while sessions stay independent. Background
/// workers communicate only through the completion store; the engine is
/// the single writer of session state.
pub struct Engine {
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
    registry: Arc<StepRegistry>,
    runner: Arc<ExtractionTaskRunner>,
    completions: CompletionStore,
    config: EngineConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a fresh session. Starting an id twice is an error; there is
    /// no implicit reset.
    pub fn start_session(&self, session_id: &str) -> Result<SessionState> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(StepflowError::session_exists(session_id)),
            Entry::Vacant(slot) => {
                let state = SessionState::new(session_id);
                slot.insert(Arc::new(Mutex::new(state.clone())));
                info!(session_id, "Session started");
                Ok(state)
            }
        }
    }

    /// Read-only snapshot
    pub async fn get_state(&self, session_id: &str) -> Result<SessionState> {
        let cell = self.session_cell(session_id)?;
        let state = cell.lock().await;
        Ok(state.clone())
    }

    /// Projection of the fields a caller would persist for resume
    pub async fn checkpoint(&self, session_id: &str) -> Result<SessionCheckpoint> {
        Ok(self.get_state(session_id).await?.checkpoint())
    }

    /// The shared completion store instance
    pub fn completions(&self) -> CompletionStore {
        self.completions.clone()
    }

    /// Run one foreground iteration for a session.
    ///
    /// Advancing a finished session is idempotent: it discards any stray
    /// completions and returns the terminal snapshot unchanged.
    pub async fn advance(&self, session_id: &str, user_input: Value) -> Result<AdvanceOutcome> {
        let cell = self.session_cell(session_id)?;
        let mut state = cell.lock().await;

        if state.finished {
            self.completions.discard(session_id);
            return Ok(AdvanceOutcome::from(&*state));
        }

        state.step_count_guard += 1;

        let route = decide(&state, &self.registry, self.config.max_guard);
        debug!(
            session_id,
            guard = state.step_count_guard,
            current_step = state.current_step,
            ?route,
            "Iteration"
        );
        match route {
            Route::Finish => {
                let reason = self.terminal_reason(&state);
                self.finish(&mut state, reason);
            }
            Route::Verification => {
                self.run_verification(&mut state, &user_input).await?;
            }
            Route::Step(step) => {
                if self.registry.review_step() == Some(step) {
                    match self.wait_for_barrier(&mut state).await {
                        BarrierResult::Open => {
                            self.run_step(&mut state, step, &user_input, true).await?
                        }
                        BarrierResult::Preempted => {
                            self.run_verification(&mut state, &user_input).await?
                        }
                        BarrierResult::TimedOut => {}
                    }
                } else {
                    self.run_step(&mut state, step, &user_input, false).await?;
                }
            }
        }

        if !state.finished {
            self.drain_into(&mut state);
            if let Route::Finish = decide(&state, &self.registry, self.config.max_guard) {
                let reason = self.terminal_reason(&state);
                self.finish(&mut state, reason);
            }
        }

        Ok(AdvanceOutcome::from(&*state))
    }

    fn session_cell(&self, session_id: &str) -> Result<Arc<Mutex<SessionState>>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StepflowError::session_not_found(session_id))
    }

    async fn run_step(
        &self,
        state: &mut SessionState,
        step: StepId,
        input: &Value,
        is_review: bool,
    ) -> Result<()> {
        let handler = self.registry.get(step).ok_or_else(|| {
            StepflowError::handler(format!("step_{}", step), "no handler registered")
        })?;
        let visit = if is_review {
            StepVisit::Review(step)
        } else {
            StepVisit::Step(step)
        };

        let view = state.clone();
        let ctx = StepContext {
            state: &view,
            visit,
            input,
        };
        debug!(
            session_id = %state.session_id,
            step,
            handler = %handler.name(),
            "Executing step"
        );
        let outcome = handler
            .execute(ctx)
            .await
            .map_err(|e| StepflowError::handler_with_source(format!("step_{}", step), e))?;

        if let Some(answer) = outcome.answer {
            state.journey_data.insert(step, answer);
        }
        for submission in outcome.submissions {
            self.submit_document(state, submission)?;
        }
        state.current_step = step + 1;
        if outcome.finish {
            self.finish(state, FinishReason::Completed);
        }
        Ok(())
    }

    async fn run_verification(&self, state: &mut SessionState, input: &Value) -> Result<()> {
        let handler = self.registry.verification_handler().ok_or_else(|| {
            StepflowError::handler("verification", "no verification handler registered")
        })?;

        let view = state.clone();
        let ctx = StepContext {
            state: &view,
            visit: StepVisit::Verification,
            input,
        };
        debug!(
            session_id = %state.session_id,
            queue_depth = state.verification_queue.len(),
            "Executing verification"
        );
        let outcome = handler
            .execute(ctx)
            .await
            .map_err(|e| StepflowError::handler_with_source("verification", e))?;

        let mut progressed = false;
        if let Some(resolution) = outcome.resolution {
            if state.verification_queue.front() == Some(&resolution.document_type) {
                state.verification_queue.pop_front();
                if let Some(corrections) = resolution.corrections {
                    merge_corrections(state, &resolution.document_type, corrections);
                }
                info!(
                    session_id = %state.session_id,
                    document_type = %resolution.document_type,
                    "Document verified"
                );
                progressed = true;
            } else {
                warn!(
                    session_id = %state.session_id,
                    document_type = %resolution.document_type,
                    "Resolution does not match the queue head"
                );
            }
        }

        if progressed {
            state.stalled_verifications = 0;
        } else {
            state.stalled_verifications += 1;
            warn!(
                session_id = %state.session_id,
                visits = state.stalled_verifications,
                "Verification visit made no progress"
            );
            if state.stalled_verifications >= self.config.stall_threshold {
                return Err(StepflowError::stalled(
                    &state.session_id,
                    state.stalled_verifications,
                ));
            }
        }

        for submission in outcome.submissions {
            self.submit_document(state, submission)?;
        }
        Ok(())
    }

    /// Review-step barrier: poll until no extraction work remains, bounded
    /// by the guard ceiling. Every poll performs the normal drain, so a
    /// completion arriving mid-wait redirects this iteration to
    /// verification instead of being silently skipped.
    async fn wait_for_barrier(&self, state: &mut SessionState) -> BarrierResult {
        loop {
            self.drain_into(state);
            if !state.verification_queue.is_empty() {
                return BarrierResult::Preempted;
            }
            if state.pending_documents.is_empty() {
                return BarrierResult::Open;
            }
            if state.step_count_guard > self.config.max_guard {
                warn!(
                    session_id = %state.session_id,
                    pending = state.pending_documents.len(),
                    "Guard exhausted while waiting on extractions"
                );
                self.finish(state, FinishReason::BarrierTimeout);
                return BarrierResult::TimedOut;
            }
            state.step_count_guard += 1;
            tokio::time::sleep(self.config.barrier_poll_interval).await;
        }
    }

    fn submit_document(
        &self,
        state: &mut SessionState,
        submission: DocumentSubmission,
    ) -> Result<()> {
        let document_id = submission
            .document_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if state.pending_documents.contains(&document_id) {
            return Err(StepflowError::duplicate_document(document_id));
        }

        state
            .document_status
            .insert(document_id.clone(), DocumentStatus::Submitted);
        state.pending_documents.insert(document_id.clone());

        let request = ExtractionRequest {
            session_id: state.session_id.clone(),
            document_id: document_id.clone(),
            document_type: submission.document_type.clone(),
            raw_input: submission.raw_input,
        };
        if let Err(e) = self.runner.submit(request) {
            state.pending_documents.remove(&document_id);
            state.document_status.remove(&document_id);
            return Err(e);
        }
        state
            .document_status
            .insert(document_id.clone(), DocumentStatus::Processing);
        info!(
            session_id = %state.session_id,
            document_id = %document_id,
            document_type = %submission.document_type,
            "Document submitted for extraction"
        );
        Ok(())
    }

    /// Move drained completions into the session, FIFO by arrival. Failed
    /// extractions still enter the verification queue so the barrier
    /// stays live and the handler can branch on the failure.
    fn drain_into(&self, state: &mut SessionState) {
        let entries = self.completions.drain(&state.session_id);
        if entries.is_empty() {
            return;
        }
        debug!(
            session_id = %state.session_id,
            count = entries.len(),
            "Draining completions"
        );
        for entry in entries {
            state.pending_documents.remove(&entry.document_id);
            match entry.outcome {
                CompletionOutcome::Success { fields } => {
                    state
                        .document_status
                        .insert(entry.document_id.clone(), DocumentStatus::Completed);
                    state
                        .extracted_data
                        .insert(entry.document_type.clone(), fields);
                }
                CompletionOutcome::Failure { reason } => {
                    state
                        .document_status
                        .insert(entry.document_id.clone(), DocumentStatus::Failed);
                    state
                        .extraction_failures
                        .insert(entry.document_type.clone(), reason);
                }
            }
            state.verification_queue.push_back(entry.document_type);
        }
    }

    fn terminal_reason(&self, state: &SessionState) -> FinishReason {
        if state.step_count_guard > self.config.max_guard {
            FinishReason::GuardExceeded
        } else {
            FinishReason::Completed
        }
    }

    fn finish(&self, state: &mut SessionState, reason: FinishReason) {
        if state.finished {
            return;
        }
        state.finished = true;
        state.finish_reason = Some(reason);
        self.completions.discard(&state.session_id);
        info!(
            session_id = %state.session_id,
            ?reason,
            guard = state.step_count_guard,
            "Session finished"
        );
    }
}

/// Builder for wiring handlers, the extractor, and limits into an engine
pub struct EngineBuilder {
    config: EngineConfig,
    registry: StepRegistry,
    extractor: Option<Arc<dyn DocumentExtractor>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: StepRegistry::new(),
            extractor: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step(mut self, step: StepId, handler: Arc<dyn StepHandler>) -> Result<Self> {
        self.registry.register(step, handler)?;
        Ok(self)
    }

    pub fn verification(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.registry.set_verification_handler(handler);
        self
    }

    pub fn review_step(mut self, step: StepId) -> Self {
        self.registry.set_review_step(step);
        self
    }

    /// Defaults to the lending-document template extractor when unset
    pub fn extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let completions = CompletionStore::new();
        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(TemplateExtractor::lending_documents()));
        let runner = Arc::new(ExtractionTaskRunner::new(
            extractor,
            completions.clone(),
            self.config.max_extraction_workers,
        ));
        Ok(Engine {
            sessions: DashMap::new(),
            registry: Arc::new(self.registry),
            runner,
            completions,
            config: self.config,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_corrections(state: &mut SessionState, document_type: &str, corrections: Value) {
    let slot = state
        .extracted_data
        .entry(document_type.to_string())
        .or_insert(Value::Null);
    match (slot, corrections) {
        (Value::Object(existing), Value::Object(fixes)) => {
            for (key, value) in fixes {
                existing.insert(key, value);
            }
        }
        (slot, corrections) => *slot = corrections,
    }
}
