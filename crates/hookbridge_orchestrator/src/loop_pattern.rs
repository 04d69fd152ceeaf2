//! Loop pattern (§4.7.3): repeat an inner Plan (here, a single phase per
//! iteration) until a convergence predicate is satisfied, an iteration
//! cap is reached, or an optional time budget is exhausted.

use crate::build_event;
use crate::context::ContextHistory;
use crate::error::{OrchestratorError, Result};
use hookbridge_dispatch::Dispatcher;
use hookbridge_protocol::Context;
use std::time::{Duration, Instant};

/// Outcome of comparing the current iteration's result against the
/// previous one.
pub struct Convergence {
    pub converged: bool,
    pub progress: f64,
}

pub struct LoopConfig {
    pub worker: String,
    pub iteration_cap: u32,
    pub time_budget: Option<Duration>,
}

pub struct LoopOutcome {
    pub final_result: serde_json::Value,
    pub final_context: Context,
    pub iterations: u32,
    pub final_progress: f64,
    /// Snapshot of the Context taken after every iteration, restorable by
    /// id (§4.7.5).
    pub history: ContextHistory,
}

/// Run `config.worker` repeatedly, folding each iteration's Context into
/// the next via `merge_strategy`-agnostic passthrough (the caller's
/// `predicate` decides convergence; Context carryover is always
/// cumulative since a loop iterates the same task).
pub async fn run_loop<P>(
    dispatcher: &Dispatcher,
    base_context: &Context,
    config: &LoopConfig,
    mut predicate: P,
) -> Result<LoopOutcome>
where
    P: FnMut(&serde_json::Value, &Option<serde_json::Value>) -> Convergence,
{
    let started = Instant::now();
    let mut context = base_context.clone();
    let mut previous: Option<serde_json::Value> = None;
    let mut progress = 0.0;
    let mut history = ContextHistory::default();
    history.push(context.clone());

    for iteration in 1..=config.iteration_cap {
        if let Some(budget) = config.time_budget {
            if started.elapsed() > budget {
                return Err(OrchestratorError::TimeBudgetExceeded(budget.as_millis() as u64));
            }
        }

        let event = build_event(&context, &config.worker);
        let response = dispatcher.dispatch(&config.worker, &event).await;
        if !response.success {
            let message = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "worker failed".to_string());
            return Err(OrchestratorError::ChainStepFailed {
                step: iteration as usize,
                worker: config.worker.clone(),
                message,
            });
        }
        let current = response.result.unwrap_or(serde_json::Value::Null);
        let outcome = predicate(&current, &previous);
        progress = outcome.progress;

        context.metadata.insert("loop_iteration".to_string(), serde_json::json!(iteration));
        context.metadata.insert("loop_result".to_string(), current.clone());
        history.push(context.clone());

        if outcome.converged {
            return Ok(LoopOutcome {
                final_result: current,
                final_context: context,
                iterations: iteration,
                final_progress: progress,
                history,
            });
        }
        previous = Some(current);
    }

    let _ = progress;
    Err(OrchestratorError::IterationCapExceeded(config.iteration_cap))
}
