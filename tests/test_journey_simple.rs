//! Basic engine behavior: linear journeys, checkpoints, duplicate
//! submissions, and the guard ceiling, without extraction timing at play.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stepflow::{
    DocumentStatus, DocumentSubmission, Engine, EngineConfig, FinishReason, StepContext,
    StepHandler, StepOutcome, StepflowError, TemplateExtractor, VerificationResolution,
};

struct AnswerStep;

#[async_trait]
impl StepHandler for AnswerStep {
    fn name(&self) -> String {
        "answer".to_string()
    }

    async fn execute(&self, ctx: StepContext<'_>) -> anyhow::Result<StepOutcome> {
        Ok(StepOutcome::answer(ctx.input.clone()))
    }
}

struct FinishStep;

#[async_trait]
impl StepHandler for FinishStep {
    fn name(&self) -> String {
        "finish".to_string()
    }

    async fn execute(&self, _ctx: StepContext<'_>) -> anyhow::Result<StepOutcome> {
        Ok(StepOutcome::finished())
    }
}

struct ConfirmVerifier;

#[async_trait]
impl StepHandler for ConfirmVerifier {
    fn name(&self) -> String {
        "confirm_verifier".to_string()
    }

    async fn execute(&self, ctx: StepContext<'_>) -> anyhow::Result<StepOutcome> {
        let (doc_type, _, _) = ctx
            .pending_verification()
            .ok_or_else(|| anyhow::anyhow!("nothing to verify"))?;
        Ok(StepOutcome::resolved(VerificationResolution::confirm(
            doc_type,
        )))
    }
}

/// Submits the same document id twice in one visit
struct DoubleSubmitStep;

#[async_trait]
impl StepHandler for DoubleSubmitStep {
    fn name(&self) -> String {
        "double_submit".to_string()
    }

    async fn execute(&self, _ctx: StepContext<'_>) -> anyhow::Result<StepOutcome> {
        Ok(StepOutcome::empty()
            .with_submission(
                DocumentSubmission::new("payslip", json!(null)).with_id("doc-dup"),
            )
            .with_submission(
                DocumentSubmission::new("payslip", json!(null)).with_id("doc-dup"),
            ))
    }
}

#[tokio::test]
async fn test_answers_recorded_per_step() {
    let engine = Engine::builder()
        .step(1, Arc::new(AnswerStep))
        .unwrap()
        .step(2, Arc::new(AnswerStep))
        .unwrap()
        .step(3, Arc::new(FinishStep))
        .unwrap()
        .build()
        .unwrap();
    engine.start_session("u1").unwrap();

    engine.advance("u1", json!({"name": "Asha"})).await.unwrap();
    engine.advance("u1", json!({"dob": "1990-01-01"})).await.unwrap();
    let done = engine.advance("u1", json!(null)).await.unwrap();

    assert!(done.is_finished);
    assert_eq!(done.state.journey_data[&1], json!({"name": "Asha"}));
    assert_eq!(done.state.journey_data[&2], json!({"dob": "1990-01-01"}));
    assert_eq!(done.state.finish_reason, Some(FinishReason::Completed));
}

#[tokio::test]
async fn test_checkpoint_carries_observable_fields() {
    let extractor = TemplateExtractor::lending_documents().with_delay(Duration::from_millis(10));
    let engine = Engine::builder()
        .extractor(Arc::new(extractor))
        .step(
            1,
            Arc::new(UploadOneStep {
                doc_type: "pan".to_string(),
            }),
        )
        .unwrap()
        .step(2, Arc::new(AnswerStep))
        .unwrap()
        .verification(Arc::new(ConfirmVerifier))
        .build()
        .unwrap();
    engine.start_session("u1").unwrap();

    engine.advance("u1", json!(null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = engine.advance("u1", json!("answer 2")).await.unwrap();
    assert_eq!(after.state.verification_queue, vec!["pan".to_string()]);

    let checkpoint = engine.checkpoint("u1").await.unwrap();
    assert_eq!(checkpoint.session_id, "u1");
    assert_eq!(checkpoint.current_step, 3);
    assert!(!checkpoint.finished);
    assert_eq!(checkpoint.verification_queue, vec!["pan".to_string()]);
    assert_eq!(checkpoint.document_status.len(), 1);
    assert!(checkpoint
        .document_status
        .values()
        .all(|status| *status == DocumentStatus::Completed));

    // survives a serde round trip for external persistence
    let encoded = serde_json::to_value(&checkpoint).unwrap();
    assert_eq!(encoded["current_step"], json!(3));
}

#[tokio::test]
async fn test_duplicate_document_id_rejected() {
    let engine = Engine::builder()
        .step(1, Arc::new(DoubleSubmitStep))
        .unwrap()
        .build()
        .unwrap();
    engine.start_session("u1").unwrap();

    let err = engine.advance("u1", json!(null)).await.unwrap_err();
    assert!(matches!(err, StepflowError::DuplicateDocument { .. }));
}

#[tokio::test]
async fn test_guard_ceiling_forces_termination() {
    let config = EngineConfig {
        max_guard: 5,
        ..EngineConfig::default()
    };
    let mut builder = Engine::builder().config(config);
    for step in 1..=20 {
        builder = builder.step(step, Arc::new(AnswerStep)).unwrap();
    }
    let engine = builder.build().unwrap();
    engine.start_session("u1").unwrap();

    let mut outcome = engine.advance("u1", json!(null)).await.unwrap();
    let mut iterations = 1;
    while !outcome.is_finished {
        outcome = engine.advance("u1", json!(null)).await.unwrap();
        iterations += 1;
        assert!(iterations <= 10, "engine failed to terminate");
    }
    assert_eq!(outcome.state.finish_reason, Some(FinishReason::GuardExceeded));
    assert_eq!(outcome.state.step_count_guard, 6);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let engine = Arc::new(
        Engine::builder()
            .step(1, Arc::new(AnswerStep))
            .unwrap()
            .step(2, Arc::new(AnswerStep))
            .unwrap()
            .build()
            .unwrap(),
    );
    for session in ["a", "b", "c"] {
        engine.start_session(session).unwrap();
    }

    let advances: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|session| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .advance(session, json!(format!("hello {}", session)))
                    .await
                    .unwrap()
            })
        })
        .collect();
    let outcomes = futures::future::join_all(advances).await;

    for (session, outcome) in ["a", "b", "c"].into_iter().zip(outcomes) {
        let outcome = outcome.unwrap();
        assert_eq!(outcome.state.session_id, session);
        assert_eq!(outcome.state.current_step, 2);
        assert_eq!(
            outcome.state.journey_data[&1],
            json!(format!("hello {}", session))
        );
    }
}

struct UploadOneStep {
    doc_type: String,
}

#[async_trait]
impl StepHandler for UploadOneStep {
    fn name(&self) -> String {
        "upload_one".to_string()
    }

    async fn execute(&self, _ctx: StepContext<'_>) -> anyhow::Result<StepOutcome> {
        Ok(StepOutcome::empty().with_submission(DocumentSubmission::new(
            self.doc_type.clone(),
            json!({"path": format!("/uploads/{}.pdf", self.doc_type)}),
        )))
    }
}
