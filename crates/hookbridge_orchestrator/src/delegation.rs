//! Delegation pattern (§4.7.2): partition a task list across up to
//! `maxConcurrency` workers, scored by a distribution strategy, with
//! redistribution to an idle peer on failure up to `maxRetries`.

use crate::build_event;
use crate::error::{OrchestratorError, Result};
use hookbridge_dispatch::Dispatcher;
use hookbridge_protocol::Context;
use hookbridge_registry::WorkerRegistry;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionStrategy {
    ByFiles,
    ByFolders,
    ByTasks,
    ByCapability,
    Auto,
}

#[derive(Debug, Clone)]
pub struct DelegationConfig {
    pub strategy: DistributionStrategy,
    pub max_concurrency: u32,
    pub max_retries: u32,
    /// Required capability for `byCapability`/`auto` scoring.
    pub capability: Option<String>,
    /// Deadline shared across every assignment in the batch: all tasks run
    /// concurrently and the whole delegation fails once this elapses,
    /// regardless of how many individual tasks already completed.
    pub deadline_ms: u64,
}

/// Score a worker for selection. `byFiles`/`byFolders`/`byTasks` only
/// care about availability (equal score); `byCapability` scores by
/// capability match; `auto` combines capability match with inverse load,
/// the signal actually available on `WorkerState` without reaching into
/// the Performance Tracker.
async fn score_worker(registry: &WorkerRegistry, name: &str, config: &DelegationConfig) -> f64 {
    let def = registry.def(name);
    let state = registry.state(name).await;
    let inflight = state.map(|s| s.inflight).unwrap_or(0) as f64;
    let inverse_load = 1.0 / (1.0 + inflight);

    match config.strategy {
        DistributionStrategy::ByFiles | DistributionStrategy::ByFolders | DistributionStrategy::ByTasks => 1.0,
        DistributionStrategy::ByCapability => {
            let Some(capability) = &config.capability else {
                return 0.0;
            };
            let has = def
                .map(|d| d.capabilities.iter().any(|c| c == capability))
                .unwrap_or(false);
            if has {
                1.0
            } else {
                0.0
            }
        }
        DistributionStrategy::Auto => {
            let capability_score = match &config.capability {
                Some(capability) => def
                    .map(|d| d.capabilities.iter().filter(|c| *c == capability).count())
                    .unwrap_or(0) as f64,
                None => 0.0,
            };
            capability_score + inverse_load
        }
    }
}

async fn select_workers(registry: &WorkerRegistry, config: &DelegationConfig) -> Result<Vec<String>> {
    let mut scored = Vec::new();
    for name in registry.names() {
        if !registry.is_healthy(&name).await {
            continue;
        }
        let score = score_worker(registry, &name, config).await;
        if matches!(config.strategy, DistributionStrategy::ByCapability) && score <= 0.0 {
            continue;
        }
        scored.push((name, score));
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    if scored.is_empty() {
        return Err(OrchestratorError::NoWorkersAvailable);
    }
    let n = (config.max_concurrency as usize).min(scored.len()).max(1);
    Ok(scored.into_iter().take(n).map(|(name, _)| name).collect())
}

/// Run every task in `tasks` against a worker pool selected per
/// `config.strategy`, redistributing a failed task to a different worker
/// up to `max_retries` times before escalating.
pub async fn run_delegation(
    dispatcher: &Dispatcher,
    registry: &WorkerRegistry,
    tasks: Vec<String>,
    context: &Context,
    config: &DelegationConfig,
) -> Result<Vec<serde_json::Value>> {
    let workers = select_workers(registry, config).await?;
    let mut assignments: Vec<(String, String)> = Vec::with_capacity(tasks.len());
    for (i, task) in tasks.into_iter().enumerate() {
        assignments.push((workers[i % workers.len()].clone(), task));
    }

    let deadline = Duration::from_millis(config.deadline_ms.max(1));
    let futures = assignments
        .into_iter()
        .map(|(worker, task)| run_task_with_retries(dispatcher, &workers, worker, task, context, config.max_retries));

    match tokio::time::timeout(deadline, futures::future::join_all(futures)).await {
        Ok(results) => results.into_iter().collect::<Result<Vec<_>>>(),
        Err(_) => Err(OrchestratorError::DelegationFailed {
            task: "*".to_string(),
            message: format!("delegation exceeded its shared deadline of {}ms", config.deadline_ms),
        }),
    }
}

async fn run_task_with_retries(
    dispatcher: &Dispatcher,
    pool: &[String],
    first_worker: String,
    task: String,
    context: &Context,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut tried = vec![first_worker.clone()];
    let mut current = first_worker;
    let mut last_message = String::new();

    for attempt in 0..=max_retries {
        let mut task_context = context.clone();
        task_context.scope = vec![task.to_string()];
        let event = build_event(&task_context, &current);
        let response = dispatcher.dispatch(&current, &event).await;
        if response.success {
            return Ok(response.result.unwrap_or(serde_json::Value::Null));
        }
        last_message = response
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "worker failed".to_string());

        if attempt == max_retries {
            break;
        }
        match pool.iter().find(|w| !tried.contains(w)) {
            Some(next) => {
                current = next.clone();
                tried.push(current.clone());
            }
            None => break,
        }
    }

    Err(OrchestratorError::DelegationFailed {
        task: task.to_string(),
        message: last_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{dispatcher_with, AlwaysOk, FailsOnce};
    use async_trait::async_trait;
    use hookbridge_protocol::{FailoverPolicy, HookEvent, ProtocolError};

    struct Slow;

    #[async_trait]
    impl hookbridge_registry::WorkerHandle for Slow {
        async fn invoke(&self, _event: &HookEvent) -> Result<serde_json::Value, ProtocolError> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(serde_json::json!({"ok": true}))
        }
        async fn probe(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn partitions_tasks_round_robin_across_selected_workers() {
        let (dispatcher, registry) = dispatcher_with(vec![
            ("w1", Box::new(AlwaysOk), FailoverPolicy::None),
            ("w2", Box::new(AlwaysOk), FailoverPolicy::None),
        ])
        .await;
        let config = DelegationConfig {
            strategy: DistributionStrategy::ByTasks,
            max_concurrency: 2,
            max_retries: 1,
            capability: None,
            deadline_ms: 5_000,
        };
        let context = Context::new("scan");
        let tasks = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = run_delegation(&dispatcher, &registry, tasks, &context, &config)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn no_healthy_workers_is_an_error() {
        let (dispatcher, registry) = dispatcher_with(vec![]).await;
        let config = DelegationConfig {
            strategy: DistributionStrategy::Auto,
            max_concurrency: 2,
            max_retries: 0,
            capability: None,
            deadline_ms: 5_000,
        };
        let context = Context::new("scan");
        let err = run_delegation(&dispatcher, &registry, vec!["a".to_string()], &context, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoWorkersAvailable));
    }

    #[tokio::test]
    async fn failed_task_redistributes_to_an_idle_peer() {
        let (dispatcher, _registry) = dispatcher_with(vec![
            ("flaky", Box::new(FailsOnce::always()), FailoverPolicy::None),
            ("backup", Box::new(AlwaysOk), FailoverPolicy::None),
        ])
        .await;
        let config = DelegationConfig {
            strategy: DistributionStrategy::ByTasks,
            max_concurrency: 1,
            max_retries: 1,
            capability: None,
            deadline_ms: 5_000,
        };
        let context = Context::new("scan");
        let result = run_task_with_retries(&dispatcher, &["flaky".to_string(), "backup".to_string()], "flaky".to_string(), "a".to_string(), &context, 1)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn shared_deadline_fails_the_whole_batch() {
        let (dispatcher, registry) = dispatcher_with(vec![("slow", Box::new(Slow), FailoverPolicy::None)]).await;
        let config = DelegationConfig {
            strategy: DistributionStrategy::ByTasks,
            max_concurrency: 1,
            max_retries: 0,
            capability: None,
            deadline_ms: 20,
        };
        let context = Context::new("scan");
        let tasks = vec!["a".to_string(), "b".to_string()];
        let err = run_delegation(&dispatcher, &registry, tasks, &context, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DelegationFailed { .. }));
    }

    #[tokio::test]
    async fn independent_tasks_run_concurrently_not_sequentially() {
        let (dispatcher, registry) = dispatcher_with(vec![
            ("w1", Box::new(Slow), FailoverPolicy::None),
            ("w2", Box::new(Slow), FailoverPolicy::None),
        ])
        .await;
        let config = DelegationConfig {
            strategy: DistributionStrategy::ByTasks,
            max_concurrency: 2,
            max_retries: 0,
            capability: None,
            // Each task alone takes 200ms; a sequential implementation of
            // two tasks would need 400ms and miss this deadline.
            deadline_ms: 300,
        };
        let context = Context::new("scan");
        let tasks = vec!["a".to_string(), "b".to_string()];
        let results = run_delegation(&dispatcher, &registry, tasks, &context, &config)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }
}
