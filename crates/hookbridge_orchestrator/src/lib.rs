//! Orchestration Engine (§4.7): four cooperating patterns — wave,
//! delegation, loop, chain — producing a `Plan` as a deterministic
//! reduction over phases held in an arena (phases referenced by id, not
//! by pointer, per the "circular references" redesign).

pub mod chain;
pub mod checkpoint;
pub mod context;
pub mod delegation;
pub mod error;
pub mod loop_pattern;
pub mod wave;

pub use chain::{run_chain, ChainOutcome, ChainStep};
pub use checkpoint::{Checkpoint, CheckpointLog};
pub use delegation::{run_delegation, DelegationConfig, DistributionStrategy};
pub use error::{OrchestratorError, Result};
pub use loop_pattern::{run_loop, Convergence, LoopConfig, LoopOutcome};
pub use wave::run_wave;

use hookbridge_protocol::{Context, HookEvent, HookKind};

/// Build the synthetic `HookEvent` an orchestration pattern dispatches to
/// a worker: the Context's command and metadata become the event's tool
/// and args, so a worker invoked mid-Plan sees the same shape it would
/// from a direct Ingress call.
pub(crate) fn build_event(context: &Context, worker: &str) -> HookEvent {
    let session_id = context
        .metadata
        .get("session_id")
        .and_then(|v| v.as_str())
        .unwrap_or("orchestrator")
        .to_string();
    let mut event = HookEvent::new(HookKind::PreTool, session_id, context.command.clone());
    event.args = serde_json::json!({
        "worker": worker,
        "flags": context.flags,
        "scope": context.scope,
        "metadata": context.metadata,
    });
    event
}

/// Fold a worker/step result into a freshly emitted Context under
/// `{key}_result`, leaving flags/scope untouched for the merge strategy
/// to reconcile (§4.7.5).
pub(crate) fn phase_result_context(context: &Context, key: &str, payload: &serde_json::Value) -> Context {
    let mut metadata = context.metadata.clone();
    metadata.insert(format!("{key}_result"), payload.clone());
    Context {
        command: context.command.clone(),
        flags: context.flags.clone(),
        scope: context.scope.clone(),
        metadata,
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use async_trait::async_trait;
    use hookbridge_cache::ResponseCache;
    use hookbridge_dispatch::{Dispatcher, DispatcherConfig};
    use hookbridge_metrics::PerformanceTracker;
    use hookbridge_protocol::{FailoverPolicy, HookEvent, ProtocolError, WorkerBudget, WorkerDef};
    use hookbridge_registry::{BreakerPool, WorkerHandle, WorkerRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub struct AlwaysOk;

    #[async_trait]
    impl WorkerHandle for AlwaysOk {
        async fn invoke(&self, _event: &HookEvent) -> Result<serde_json::Value, ProtocolError> {
            Ok(serde_json::json!({"ok": true}))
        }
        async fn probe(&self) -> bool {
            true
        }
    }

    /// Fails its first `fail_count` calls, then always succeeds.
    /// `always()` never stops failing.
    pub struct FailsOnce {
        calls: AtomicUsize,
        fail_count: usize,
    }

    impl FailsOnce {
        pub fn always() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_count: usize::MAX,
            }
        }

        pub fn new(fail_count: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_count,
            }
        }
    }

    #[async_trait]
    impl WorkerHandle for FailsOnce {
        async fn invoke(&self, _event: &HookEvent) -> Result<serde_json::Value, ProtocolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                Err(ProtocolError::WorkerError {
                    worker: "flaky".into(),
                    message: "boom".into(),
                })
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
        async fn probe(&self) -> bool {
            true
        }
    }

    /// Counts down from `start`, reporting `remaining` each call.
    pub struct Countdown {
        remaining: AtomicUsize,
    }

    impl Countdown {
        pub fn new(start: usize) -> Self {
            Self {
                remaining: AtomicUsize::new(start),
            }
        }
    }

    #[async_trait]
    impl WorkerHandle for Countdown {
        async fn invoke(&self, _event: &HookEvent) -> Result<serde_json::Value, ProtocolError> {
            let current = self.remaining.load(Ordering::SeqCst);
            let next = current.saturating_sub(1);
            self.remaining.store(next, Ordering::SeqCst);
            Ok(serde_json::json!({"remaining": next as i64}))
        }
        async fn probe(&self) -> bool {
            true
        }
    }

    fn def(name: &str) -> WorkerDef {
        WorkerDef {
            name: name.to_string(),
            kind: "test".into(),
            version: "1".into(),
            capabilities: vec!["generic".into()],
            dependencies: vec![],
            probe_interval_ms: 10_000,
            failover_policy: FailoverPolicy::None,
            fallback_worker: None,
            failure_threshold: 100,
            budget: WorkerBudget {
                max_exec_ms: 2_000,
                max_concurrent: 8,
            },
        }
    }

    /// Build a Dispatcher wired to a fresh in-memory Registry/Cache/
    /// Breaker pool/Metrics stack, with each `(name, handle, policy)`
    /// registered and marked healthy.
    pub async fn dispatcher_with(
        workers: Vec<(&str, Box<dyn WorkerHandle>, FailoverPolicy)>,
    ) -> (Dispatcher, Arc<WorkerRegistry>) {
        let breakers = Arc::new(BreakerPool::new(Default::default()));
        let registry = Arc::new(WorkerRegistry::new(Arc::clone(&breakers)));
        for (name, handle, policy) in workers {
            let mut worker_def = def(name);
            worker_def.failover_policy = policy;
            registry.register(worker_def, Arc::from(handle)).await.unwrap();
            registry.mark_probe_result(name, true).await;
        }
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            breakers,
            Arc::new(ResponseCache::default()),
            Arc::new(PerformanceTracker::new()),
            DispatcherConfig::default(),
        );
        (dispatcher, registry)
    }
}
