// Core infrastructure modules
pub mod core;

// Orchestration building blocks
pub mod completion; // concurrent store of finished extractions
pub mod extraction; // background worker pool and the extractor capability
pub mod routing; // pure router and the step registry
pub mod session; // per-session state, the single source of truth

// The orchestrator loop
pub mod engine;

// Re-exports for convenience
pub use crate::core::errors::{Result, StepflowError};
pub use crate::core::limits::EngineConfig;

pub use completion::{CompletionEntry, CompletionOutcome, CompletionStore};
pub use engine::{AdvanceOutcome, Engine, EngineBuilder};
pub use extraction::{
    DocumentExtractor, ExtractionRequest, ExtractionTaskRunner, TemplateExtractor,
};
pub use routing::{
    decide, DocumentSubmission, Route, StepContext, StepHandler, StepOutcome, StepRegistry,
    StepVisit, VerificationResolution,
};
pub use session::{
    DocumentStatus, FinishReason, SessionCheckpoint, SessionPhase, SessionState, StepId,
};
