//! Chain pattern (§4.7.4): ordered `(worker, operation)` hand-offs. Step
//! k+1 only runs after step k succeeds, and sees the merge of the
//! initial context with every prior step's emitted context — no key
//! emitted at step k is dropped before step k+1 reads it unless a
//! selector excludes it.

use crate::build_event;
use crate::context::{merge, ContextHistory};
use crate::error::{OrchestratorError, Result};
use crate::phase_result_context;
use hookbridge_dispatch::Dispatcher;
use hookbridge_protocol::{Context, MergeStrategy};
use std::time::Duration;

pub struct ChainStep {
    pub worker: String,
    pub operation: String,
    pub timeout: Duration,
    /// Metadata keys to drop from this step's emitted context before the
    /// next step sees it. Empty means nothing is dropped.
    pub excludes: Vec<String>,
}

pub struct ChainOutcome {
    pub final_context: Context,
    pub step_results: Vec<serde_json::Value>,
    /// Snapshot of the Context taken after every successful hand-off,
    /// restorable by id (§4.7.5).
    pub history: ContextHistory,
}

pub async fn run_chain(
    dispatcher: &Dispatcher,
    base_context: &Context,
    steps: &[ChainStep],
    merge_strategy: MergeStrategy,
) -> Result<ChainOutcome> {
    let mut context = base_context.clone();
    let mut step_results = Vec::with_capacity(steps.len());
    let mut history = ContextHistory::default();
    history.push(context.clone());

    for (i, step) in steps.iter().enumerate() {
        let event = build_event(&context, &step.worker);
        let response = match tokio::time::timeout(step.timeout, dispatcher.dispatch(&step.worker, &event)).await {
            Ok(response) => response,
            Err(_) => {
                return Err(OrchestratorError::ChainStepFailed {
                    step: i,
                    worker: step.worker.clone(),
                    message: format!("hand-off timed out after {}ms", step.timeout.as_millis()),
                })
            }
        };
        if !response.success {
            let message = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "worker failed".to_string());
            return Err(OrchestratorError::ChainStepFailed {
                step: i,
                worker: step.worker.clone(),
                message,
            });
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        let mut emitted = phase_result_context(&context, &step.operation, &result);
        for excluded in &step.excludes {
            emitted.metadata.remove(excluded);
        }
        context = merge(merge_strategy, &context, &emitted);
        history.push(context.clone());
        step_results.push(result);
    }

    Ok(ChainOutcome {
        final_context: context,
        step_results,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{dispatcher_with, AlwaysOk, FailsOnce};
    use hookbridge_protocol::FailoverPolicy;

    fn step(worker: &str, operation: &str) -> ChainStep {
        ChainStep {
            worker: worker.to_string(),
            operation: operation.to_string(),
            timeout: Duration::from_millis(1_000),
            excludes: vec![],
        }
    }

    #[tokio::test]
    async fn every_step_result_is_carried_forward_without_being_dropped() {
        let (dispatcher, _registry) = dispatcher_with(vec![
            ("w1", Box::new(AlwaysOk), FailoverPolicy::None),
            ("w2", Box::new(AlwaysOk), FailoverPolicy::None),
        ])
        .await;
        let steps = vec![step("w1", "lint"), step("w2", "test")];
        let context = Context::new("ci");
        let outcome = run_chain(&dispatcher, &context, &steps, MergeStrategy::Sequential)
            .await
            .unwrap();
        assert!(outcome.final_context.metadata.contains_key("lint_result"));
        assert!(outcome.final_context.metadata.contains_key("test_result"));
        assert_eq!(outcome.step_results.len(), 2);
    }

    #[tokio::test]
    async fn a_failing_step_halts_the_chain() {
        let (dispatcher, _registry) = dispatcher_with(vec![
            ("w1", Box::new(FailsOnce::always()), FailoverPolicy::None),
            ("w2", Box::new(AlwaysOk), FailoverPolicy::None),
        ])
        .await;
        let steps = vec![step("w1", "lint"), step("w2", "test")];
        let context = Context::new("ci");
        let err = run_chain(&dispatcher, &context, &steps, MergeStrategy::Sequential)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ChainStepFailed { step: 0, .. }));
    }

    #[tokio::test]
    async fn excluded_keys_are_dropped_from_the_handed_off_context() {
        let (dispatcher, _registry) =
            dispatcher_with(vec![("w1", Box::new(AlwaysOk), FailoverPolicy::None)]).await;
        let mut only_step = step("w1", "lint");
        only_step.excludes = vec!["lint_result".to_string()];
        let context = Context::new("ci");
        let outcome = run_chain(&dispatcher, &context, &[only_step], MergeStrategy::Sequential)
            .await
            .unwrap();
        assert!(!outcome.final_context.metadata.contains_key("lint_result"));
    }
}
