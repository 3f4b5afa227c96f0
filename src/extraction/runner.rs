use crate::completion::{CompletionEntry, CompletionOutcome, CompletionStore};
use crate::core::errors::{Result, StepflowError};
use crate::extraction::extractor::{DocumentExtractor, ExtractionRequest};
use chrono::Utc;
use dashmap::DashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs extraction jobs off the foreground path.
///
/// `submit` returns immediately; the job executes on a Semaphore-bounded
/// pool of spawned tasks and publishes exactly one completion entry,
/// success or failure. There is no auto-retry; retry policy belongs to
/// the caller.
pub struct ExtractionTaskRunner {
    extractor: Arc<dyn DocumentExtractor>,
    store: CompletionStore,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<String>>,
    active: Arc<AtomicUsize>,
}

impl ExtractionTaskRunner {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        store: CompletionStore,
        max_workers: usize,
    ) -> Self {
        Self {
            extractor,
            store,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            in_flight: Arc::new(DashSet::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue one extraction job and return without waiting for it.
    ///
    /// The same document id can never be processed by two workers at
    /// once; resubmitting while the first job is still in flight is an
    /// error.
    pub fn submit(&self, request: ExtractionRequest) -> Result<()> {
        if !self.in_flight.insert(request.document_id.clone()) {
            return Err(StepflowError::duplicate_document(&request.document_id));
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(
            session_id = %request.session_id,
            document_id = %request.document_id,
            document_type = %request.document_type,
            "Extraction submitted"
        );

        let extractor = self.extractor.clone();
        let store = self.store.clone();
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            // pool bound applies inside the spawned task so submit never blocks
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            let outcome = match extractor.extract(&request).await {
                Ok(fields) => match extractor.validate_output(&request.document_type, &fields) {
                    Ok(()) => CompletionOutcome::Success { fields },
                    Err(e) => {
                        warn!(
                            document_id = %request.document_id,
                            "Extraction output rejected: {}", e
                        );
                        CompletionOutcome::Failure {
                            reason: e.to_string(),
                        }
                    }
                },
                Err(e) => {
                    warn!(document_id = %request.document_id, "Extraction failed: {}", e);
                    CompletionOutcome::Failure {
                        reason: e.to_string(),
                    }
                }
            };

            store.put(CompletionEntry {
                session_id: request.session_id,
                document_id: request.document_id.clone(),
                document_type: request.document_type,
                outcome,
                completed_at: Utc::now().naive_utc(),
            });
            in_flight.remove(&request.document_id);
            active.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Jobs submitted but not yet published
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
