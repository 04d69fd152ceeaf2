//! Dispatcher (§4.6): given a typed `HookEvent`, selects a worker and
//! invokes it through cache, single-flight, circuit breaker, per-worker
//! budget, deadline, and one fallback attempt. Generalized from
//! `Sentinel::assign_job`/`dispatch_loop`/`handle_job_failure`'s
//! SQLite-backed job queue to an in-memory pipeline.

pub mod budget;

use budget::WorkerBudget;
use dashmap::DashMap;
use hookbridge_cache::ResponseCache;
use hookbridge_metrics::PerformanceTracker;
use hookbridge_protocol::{
    cache_fingerprint, ErrorPayload, FailoverPolicy, HookEvent, HookResponse, PerformanceMeta, ProtocolError,
};
use hookbridge_registry::{BreakerPool, WorkerRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct DispatcherConfig {
    pub default_operation: &'static str,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_operation: "dispatch",
        }
    }
}

/// Ties the Worker Registry, Breaker Pool, Response Cache, and
/// Performance Tracker into the single call surface Ingress invokes per
/// hook event.
pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    breakers: Arc<BreakerPool>,
    cache: Arc<ResponseCache>,
    metrics: Arc<PerformanceTracker>,
    budgets: DashMap<String, Arc<WorkerBudget>>,
    config: DispatcherConfig,
    shutting_down: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        breakers: Arc<BreakerPool>,
        cache: Arc<ResponseCache>,
        metrics: Arc<PerformanceTracker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            cache,
            metrics,
            budgets: DashMap::new(),
            config,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop admitting new dispatch calls and fail inflight ones still
    /// waiting on a result as soon as they next check in (§8 graceful
    /// shutdown).
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    fn budget_for(&self, worker: &str, max_concurrent: u32) -> Arc<WorkerBudget> {
        Arc::clone(
            &self
                .budgets
                .entry(worker.to_string())
                .or_insert_with(|| Arc::new(WorkerBudget::new(max_concurrent))),
        )
    }

    /// Run the full dispatch pipeline for one hook event against an
    /// explicitly named worker (§4.6 steps 1-7).
    #[tracing::instrument(skip(self, event), fields(worker = %worker_name, kind = event.kind.as_str()))]
    pub async fn dispatch(&self, worker_name: &str, event: &HookEvent) -> HookResponse {
        let started = std::time::Instant::now();
        let operation = self.config.default_operation;
        let timer = self.metrics.start_timer(format!("dispatch:{worker_name}"));

        let outcome = self.dispatch_inner(worker_name, operation, event).await;

        let is_error = outcome.is_err();
        self.metrics.end_timer(timer, is_error);

        match outcome {
            Ok((value, cache_hit)) => HookResponse {
                id: event.id,
                success: true,
                result: Some(value),
                error: None,
                performance: PerformanceMeta {
                    cache_hit,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            },
            Err(e) => HookResponse {
                id: event.id,
                success: false,
                result: None,
                error: Some(ErrorPayload {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    correlation_id: event.correlation_id,
                }),
                performance: PerformanceMeta {
                    cache_hit: false,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            },
        }
    }

    async fn dispatch_inner(
        &self,
        worker_name: &str,
        operation: &str,
        event: &HookEvent,
    ) -> Result<(serde_json::Value, bool), ProtocolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ProtocolError::Shutdown);
        }

        let def = self
            .registry
            .def(worker_name)
            .ok_or_else(|| ProtocolError::NoWorker(worker_name.to_string()))?;

        if !self.registry.is_healthy(worker_name).await {
            return match def.failover_policy {
                FailoverPolicy::None => Err(ProtocolError::NoWorker(worker_name.to_string())),
                _ => self.try_fallback(&def.fallback_worker, operation, event).await,
            };
        }

        if !self.breakers.admit(worker_name, operation) {
            self.metrics.record_cache_miss();
            let primary = Err(ProtocolError::CircuitOpen {
                worker: worker_name.to_string(),
                operation: operation.to_string(),
            });
            return match def.failover_policy {
                FailoverPolicy::None => primary,
                _ => match self.try_fallback(&def.fallback_worker, operation, event).await {
                    Ok(ok) => Ok(ok),
                    Err(_) => primary,
                },
            };
        }

        let normalized_args = event.args.to_string();
        let key = cache_fingerprint(worker_name, event.kind.as_str(), &event.session_id, &normalized_args);
        let cacheable = event.kind.is_cacheable();

        let registry = Arc::clone(&self.registry);
        let breakers = Arc::clone(&self.breakers);
        let budget = self.budget_for(worker_name, def.budget.max_concurrent);
        let deadline = Duration::from_millis(def.budget.max_exec_ms);
        let worker_owned = worker_name.to_string();
        let operation_owned = operation.to_string();
        let event = event.clone();

        let result = self
            .cache
            .get_or_compute(key.clone(), cacheable, None, move || async move {
                let Some(_permit) = budget.try_reserve() else {
                    return Err(ProtocolError::Overloaded {
                        worker: worker_owned.clone(),
                    });
                };
                registry.inc_inflight(&worker_owned).await;
                let handle = match registry.handle(&worker_owned) {
                    Some(handle) => handle,
                    None => {
                        registry.dec_inflight(&worker_owned).await;
                        return Err(ProtocolError::NoWorker(worker_owned.clone()));
                    }
                };
                let cancel_token = registry.cancellation_token(&worker_owned);
                let outcome = race_invoke(handle.invoke(&event), deadline, cancel_token).await;
                registry.dec_inflight(&worker_owned).await;

                match outcome {
                    InvokeOutcome::Completed(Ok(value)) => {
                        breakers.record_success(&worker_owned, &operation_owned);
                        Ok(value)
                    }
                    InvokeOutcome::Completed(Err(e)) => {
                        breakers.record_failure(&worker_owned, &operation_owned);
                        Err(e)
                    }
                    InvokeOutcome::TimedOut => {
                        breakers.record_failure(&worker_owned, &operation_owned);
                        Err(ProtocolError::Timeout {
                            worker: worker_owned.clone(),
                            elapsed_ms: deadline.as_millis() as u64,
                        })
                    }
                    InvokeOutcome::Cancelled => Err(ProtocolError::WorkerError {
                        worker: worker_owned.clone(),
                        message: "worker was unregistered mid-call".to_string(),
                    }),
                }
            })
            .await;

        match result {
            Ok((value, hit)) => {
                if hit {
                    self.metrics.record_cache_hit();
                } else {
                    self.metrics.record_cache_miss();
                }
                Ok((value, hit))
            }
            Err(e) => {
                self.metrics.record_cache_miss();
                match def.failover_policy {
                    FailoverPolicy::None => Err(e),
                    _ => match self.try_fallback(&def.fallback_worker, operation, &event).await {
                        Ok(ok) => Ok(ok),
                        Err(_) => Err(e),
                    },
                }
            }
        }
    }

    async fn try_fallback(
        &self,
        fallback: &Option<String>,
        operation: &str,
        event: &HookEvent,
    ) -> Result<(serde_json::Value, bool), ProtocolError> {
        let Some(fallback_name) = fallback else {
            return Err(ProtocolError::NoWorker("no fallback configured".into()));
        };
        // Boxed to keep this recursive call's future size bounded.
        Box::pin(self.dispatch_inner(fallback_name, operation, event)).await
    }

    /// Administrative cache eviction by glob-style pattern (`invalidate-cache`, §6).
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Administrative breaker reset (`circuit-reset`, §6). Resets every
    /// operation this dispatcher has ever opened a breaker for on `worker`.
    pub fn reset_breaker(&self, worker: &str) {
        self.breakers.reset(worker, self.config.default_operation);
    }
}

enum InvokeOutcome {
    Completed(Result<serde_json::Value, ProtocolError>),
    TimedOut,
    Cancelled,
}

/// Race a worker invocation against its deadline and, if the worker was
/// unregistered mid-call, its cancellation token.
async fn race_invoke(
    call: impl std::future::Future<Output = Result<serde_json::Value, ProtocolError>>,
    deadline: Duration,
    cancel_token: Option<CancellationToken>,
) -> InvokeOutcome {
    tokio::select! {
        res = call => InvokeOutcome::Completed(res),
        _ = tokio::time::sleep(deadline) => InvokeOutcome::TimedOut,
        _ = cancelled(&cancel_token) => InvokeOutcome::Cancelled,
    }
}

async fn cancelled(token: &Option<CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hookbridge_protocol::{FailoverPolicy, HookKind, WorkerBudget as WireBudget, WorkerDef};
    use hookbridge_registry::WorkerHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl WorkerHandle for Scripted {
        async fn invoke(&self, _event: &HookEvent) -> Result<serde_json::Value, ProtocolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(ProtocolError::WorkerError {
                    worker: "scripted".into(),
                    message: "boom".into(),
                })
            } else {
                Ok(serde_json::json!({"n": n}))
            }
        }
        async fn probe(&self) -> bool {
            true
        }
    }

    struct Slow;

    #[async_trait]
    impl WorkerHandle for Slow {
        async fn invoke(&self, _event: &HookEvent) -> Result<serde_json::Value, ProtocolError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(serde_json::json!({"ok": true}))
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
            capabilities: vec!["pre_tool".into()],
            dependencies: vec![],
            probe_interval_ms: 10_000,
            failover_policy: FailoverPolicy::None,
            fallback_worker: None,
            failure_threshold: 2,
            budget: WireBudget {
                max_exec_ms: 200,
                max_concurrent: 4,
            },
        }
    }

    async fn make_dispatcher() -> (Dispatcher, Arc<WorkerRegistry>) {
        let breakers = Arc::new(BreakerPool::new(Default::default()));
        let registry = Arc::new(WorkerRegistry::new(Arc::clone(&breakers)));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            breakers,
            Arc::new(ResponseCache::default()),
            Arc::new(PerformanceTracker::new()),
            DispatcherConfig::default(),
        );
        (dispatcher, registry)
    }

    #[tokio::test]
    async fn successful_dispatch_returns_result() {
        let (dispatcher, registry) = make_dispatcher().await;
        registry
            .register(def("w1"), Arc::new(Scripted { calls: AtomicUsize::new(0), fail_first_n: 0 }))
            .await
            .unwrap();
        registry.mark_probe_result("w1", true).await;
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let resp = dispatcher.dispatch("w1", &event).await;
        assert!(resp.success);
    }

    #[tokio::test]
    async fn no_worker_returns_no_worker_error() {
        let (dispatcher, _registry) = make_dispatcher().await;
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let resp = dispatcher.dispatch("missing", &event).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, "NoWorker");
    }

    #[tokio::test]
    async fn cacheable_success_is_served_from_cache_on_second_call() {
        let (dispatcher, registry) = make_dispatcher().await;
        registry
            .register(def("w1"), Arc::new(Scripted { calls: AtomicUsize::new(0), fail_first_n: 0 }))
            .await
            .unwrap();
        registry.mark_probe_result("w1", true).await;
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let first = dispatcher.dispatch("w1", &event).await;
        let second = dispatcher.dispatch("w1", &event).await;
        assert!(!first.performance.cache_hit);
        assert!(second.performance.cache_hit);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_dispatch_calls() {
        let (dispatcher, registry) = make_dispatcher().await;
        registry
            .register(def("w1"), Arc::new(Scripted { calls: AtomicUsize::new(0), fail_first_n: 0 }))
            .await
            .unwrap();
        registry.mark_probe_result("w1", true).await;
        dispatcher.begin_shutdown();
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let resp = dispatcher.dispatch("w1", &event).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, "Shutdown");
    }

    #[tokio::test]
    async fn unregistering_a_worker_cancels_its_inflight_call() {
        let (dispatcher, registry) = make_dispatcher().await;
        let dispatcher = Arc::new(dispatcher);
        registry.register(def("slow"), Arc::new(Slow)).await.unwrap();
        registry.mark_probe_result("slow", true).await;
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let d = Arc::clone(&dispatcher);
        let dispatch = tokio::spawn(async move { d.dispatch("slow", &event).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.unregister("slow");
        let resp = dispatch.await.unwrap();
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn unhealthy_worker_without_failover_returns_no_worker_error() {
        let (dispatcher, registry) = make_dispatcher().await;
        registry
            .register(def("w1"), Arc::new(Scripted { calls: AtomicUsize::new(0), fail_first_n: 0 }))
            .await
            .unwrap();
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let resp = dispatcher.dispatch("w1", &event).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, "NoWorker");
    }
}
