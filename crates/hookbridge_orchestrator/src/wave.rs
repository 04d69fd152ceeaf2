//! Wave pattern (§4.7.1): dependency-topological phase execution, with
//! same-level `parallel=true` phases fanned out via `FuturesUnordered`,
//! checkpointing after each phase completes.

use crate::checkpoint::CheckpointLog;
use crate::context::{merge, ContextHistory};
use crate::error::{OrchestratorError, Result};
use crate::{build_event, phase_result_context};
use futures::stream::{FuturesUnordered, StreamExt};
use hookbridge_dispatch::Dispatcher;
use hookbridge_protocol::{Context, MergeStrategy, Phase, PhaseStatus};
use std::collections::{HashMap, HashSet, VecDeque};

/// Group phase ids into dependency-respecting levels (Kahn's algorithm by
/// generation). Phases within a level have no dependency on one another.
fn topological_levels(phases: &[Phase]) -> Result<Vec<Vec<usize>>> {
    let index_of: HashMap<&str, usize> = phases.iter().enumerate().map(|(i, p)| (p.id.as_str(), i)).collect();
    let mut indegree = vec![0usize; phases.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); phases.len()];

    for (i, phase) in phases.iter().enumerate() {
        for dep in &phase.dependencies {
            let Some(&dep_idx) = index_of.get(dep.as_str()) else {
                return Err(OrchestratorError::UnknownDependency(phase.id.clone(), dep.clone()));
            };
            indegree[i] += 1;
            dependents[dep_idx].push(i);
        }
    }

    let mut ready: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut levels = Vec::new();
    let mut visited = HashSet::new();
    let mut remaining_indegree = indegree.clone();

    while !ready.is_empty() {
        let level: Vec<usize> = ready.drain(..).collect();
        for &i in &level {
            visited.insert(i);
        }
        let mut next_ready = Vec::new();
        for &i in &level {
            for &dep_idx in &dependents[i] {
                remaining_indegree[dep_idx] -= 1;
                if remaining_indegree[dep_idx] == 0 {
                    next_ready.push(dep_idx);
                }
            }
        }
        levels.push(level);
        ready.extend(next_ready);
    }

    if visited.len() != phases.len() {
        return Err(OrchestratorError::CyclicDependencies);
    }
    Ok(levels)
}

/// Run every phase of `phases` to completion, mutating each `Phase.status`
/// in place and returning the final merged Context plus the checkpoint
/// log recorded along the way.
pub async fn run_wave(
    dispatcher: &Dispatcher,
    phases: &mut [Phase],
    base_context: &Context,
    merge_strategy: MergeStrategy,
) -> Result<(Context, CheckpointLog)> {
    let levels = topological_levels(phases)?;
    let mut checkpoints = CheckpointLog::new();
    let mut history = ContextHistory::default();
    let mut context = base_context.clone();
    history.push(context.clone());

    for level in levels {
        let all_parallel = level.iter().all(|&i| phases[i].parallel);
        if all_parallel && level.len() > 1 {
            let mut tasks = FuturesUnordered::new();
            for &i in &level {
                let phase = phases[i].clone();
                let ctx = context.clone();
                tasks.push(async move {
                    let outcome = run_phase(dispatcher, &phase, &ctx).await;
                    (i, outcome)
                });
            }
            while let Some((i, outcome)) = tasks.next().await {
                context = apply_phase_outcome(
                    dispatcher,
                    &mut phases[i],
                    outcome,
                    context,
                    &mut checkpoints,
                    &mut history,
                    merge_strategy,
                )
                .await?;
            }
        } else {
            for &i in &level {
                let phase = phases[i].clone();
                let outcome = run_phase(dispatcher, &phase, &context).await;
                context = apply_phase_outcome(
                    dispatcher,
                    &mut phases[i],
                    outcome,
                    context,
                    &mut checkpoints,
                    &mut history,
                    merge_strategy,
                )
                .await?;
            }
        }
    }

    Ok((context, checkpoints))
}

type PhaseOutcome = std::result::Result<(serde_json::Value, String), OrchestratorError>;

/// Run every worker named on `phase`, fanning them out concurrently when
/// `phase.parallel` is set (§4.7.1's per-phase worker concurrency).
async fn run_phase(dispatcher: &Dispatcher, phase: &Phase, context: &Context) -> PhaseOutcome {
    let deadline = std::time::Duration::from_millis(phase.timeout_ms.max(1));

    if phase.parallel && phase.workers.len() > 1 {
        let mut tasks = FuturesUnordered::new();
        for worker in &phase.workers {
            let worker = worker.clone();
            let event = build_event(context, &worker);
            let phase_id = phase.id.clone();
            tasks.push(async move {
                match tokio::time::timeout(deadline, dispatcher.dispatch(&worker, &event)).await {
                    Ok(response) if response.success => Ok(response.result.unwrap_or(serde_json::Value::Null)),
                    Ok(response) => Err(OrchestratorError::PhaseFailed {
                        phase_id,
                        worker,
                        message: response.error.map(|e| e.message).unwrap_or_else(|| "worker failed".to_string()),
                    }),
                    Err(_) => Err(OrchestratorError::PhaseFailed {
                        phase_id,
                        worker,
                        message: format!("phase timed out after {}ms", phase.timeout_ms),
                    }),
                }
            });
        }
        let mut results = Vec::with_capacity(phase.workers.len());
        let mut first_err = None;
        while let Some(outcome) = tasks.next().await {
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        let payload = serde_json::Value::Array(results);
        let payload_str = payload.to_string();
        return Ok((payload, payload_str));
    }

    let mut results = Vec::with_capacity(phase.workers.len());
    for worker in &phase.workers {
        let event = build_event(context, worker);
        let response = match tokio::time::timeout(deadline, dispatcher.dispatch(worker, &event)).await {
            Ok(response) => response,
            Err(_) => {
                return Err(OrchestratorError::PhaseFailed {
                    phase_id: phase.id.clone(),
                    worker: worker.clone(),
                    message: format!("phase timed out after {}ms", phase.timeout_ms),
                })
            }
        };
        if !response.success {
            let message = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "worker failed".to_string());
            return Err(OrchestratorError::PhaseFailed {
                phase_id: phase.id.clone(),
                worker: worker.clone(),
                message,
            });
        }
        results.push(response.result.unwrap_or(serde_json::Value::Null));
    }
    let payload = serde_json::Value::Array(results);
    let payload_str = payload.to_string();
    Ok((payload, payload_str))
}

/// Apply a phase's outcome, retrying up to `phase.retry_cap` times by
/// rolling back to the last recorded context snapshot before a
/// non-optional failure falls through to skip/fail (§4.7.1).
async fn apply_phase_outcome(
    dispatcher: &Dispatcher,
    phase: &mut Phase,
    mut outcome: PhaseOutcome,
    mut context: Context,
    checkpoints: &mut CheckpointLog,
    history: &mut ContextHistory,
    merge_strategy: MergeStrategy,
) -> Result<Context> {
    let mut attempt = 0;
    loop {
        match outcome {
            Ok((payload, payload_str)) => {
                phase.status = PhaseStatus::Completed;
                let emitted = phase_result_context(&context, &phase.id, &payload);
                context = merge(merge_strategy, &context, &emitted);
                checkpoints.record(phase.id.clone(), &payload_str, &context);
                history.push(context.clone());
                return Ok(context);
            }
            Err(e) => {
                if attempt < phase.retry_cap {
                    attempt += 1;
                    tracing::warn!(phase = %phase.id, attempt, "rolling back to last checkpoint and retrying phase");
                    if let Some(snapshot) = history.get(history.len() - 1) {
                        context = snapshot.clone();
                    }
                    outcome = run_phase(dispatcher, phase, &context).await;
                    continue;
                }
                if phase.optional {
                    phase.status = PhaseStatus::Skipped;
                    return Ok(context);
                }
                phase.status = PhaseStatus::Failed;
                return Err(e);
            }
        }
    }
}
