use crate::routing::registry::StepRegistry;
use crate::session::{SessionState, StepId};

/// Destination for the next foreground iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run the handler registered for this step
    Step(StepId),
    /// Work off the verification backlog before continuing the sequence
    Verification,
    /// Terminal; the engine marks the session finished
    Finish,
}

/// Rule-based router. Priority: termination > verification > next step.
///
/// Pure over a state snapshot: no side effects, never suspends. The
/// engine consults it after every iteration, so a completion draining in
/// mid-journey redirects the very next iteration.
pub fn decide(state: &SessionState, registry: &StepRegistry, max_guard: u32) -> Route {
    // Guard: hard terminate if exceeded
    if state.step_count_guard > max_guard {
        return Route::Finish;
    }

    // Already done. Outranks the verification backlog.
    if state.finished {
        return Route::Finish;
    }

    // Priority 1: pending verifications
    if !state.verification_queue.is_empty() {
        return Route::Verification;
    }

    // Priority 2: continue the journey
    if registry.contains(state.current_step) {
        return Route::Step(state.current_step);
    }

    // Default: done
    Route::Finish
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::registry::{StepContext, StepHandler, StepOutcome};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopHandler;

    #[async_trait]
    impl StepHandler for NoopHandler {
        fn name(&self) -> String {
            "noop".to_string()
        }

        async fn execute(&self, _ctx: StepContext<'_>) -> anyhow::Result<StepOutcome> {
            Ok(StepOutcome::empty())
        }
    }

    fn registry_with_steps(last: StepId) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for step in 1..=last {
            registry.register(step, Arc::new(NoopHandler)).unwrap();
        }
        registry
    }

    #[test]
    fn test_verification_preempts_sequential_order() {
        let registry = registry_with_steps(14);
        let mut state = SessionState::new("s1");
        state.current_step = 7;
        state.verification_queue.push_back("bank_statement".to_string());

        assert_eq!(decide(&state, &registry, 25), Route::Verification);
    }

    #[test]
    fn test_finished_outranks_verification() {
        let registry = registry_with_steps(14);
        let mut state = SessionState::new("s1");
        state.finished = true;
        state.verification_queue.push_back("bank_statement".to_string());

        assert_eq!(decide(&state, &registry, 25), Route::Finish);
    }

    #[test]
    fn test_guard_monotonicity() {
        let registry = registry_with_steps(14);
        let mut state = SessionState::new("s1");
        state.verification_queue.push_back("payslip".to_string());
        state.step_count_guard = 26;

        assert_eq!(decide(&state, &registry, 25), Route::Finish);

        // anything at or under the ceiling still routes normally
        state.step_count_guard = 25;
        assert_eq!(decide(&state, &registry, 25), Route::Verification);
    }

    #[test]
    fn test_sequential_progression() {
        let registry = registry_with_steps(3);
        let mut state = SessionState::new("s1");

        assert_eq!(decide(&state, &registry, 25), Route::Step(1));
        state.current_step = 3;
        assert_eq!(decide(&state, &registry, 25), Route::Step(3));
    }

    #[test]
    fn test_unmapped_step_falls_back_to_finish() {
        let registry = registry_with_steps(3);
        let mut state = SessionState::new("s1");
        state.current_step = 4;

        assert_eq!(decide(&state, &registry, 25), Route::Finish);
    }
}
