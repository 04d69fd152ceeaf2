//! Worker Registry (§4.2): register/unregister/discover registered
//! workers, track mutable health state, and run independent liveness
//! probes with the failover policy named on each `WorkerDef`.
//!
//! Generalized from `Sentinel`'s `ConnectedWorker` map and
//! `cleanup_stale_workers`/`register_worker` pair to a transport-agnostic
//! registry: a worker is anything implementing [`WorkerHandle`], whether
//! that's an in-process trait object, an HTTP client, or a duplex-channel
//! connection.

use crate::breaker::BreakerPool;
use async_trait::async_trait;
use dashmap::DashMap;
use hookbridge_protocol::{FailoverPolicy, HookEvent, ProtocolError, WorkerDef, WorkerState, WorkerStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Rejections `register` can return instead of silently overwriting an
/// existing entry or accepting a dependency that isn't actually there yet.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("worker {0} is already registered")]
    Duplicate(String),
    #[error("worker depends on unregistered worker {0}")]
    MissingDependency(String),
    #[error("worker depends on unhealthy worker {0}")]
    UnhealthyDependency(String),
}

/// A registered worker's callable surface. Implementors may wrap an
/// in-process responder, an HTTP client, or a duplex-channel peer.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    async fn invoke(&self, event: &HookEvent) -> Result<serde_json::Value, ProtocolError>;
    async fn probe(&self) -> bool;
}

struct RegisteredWorker {
    def: WorkerDef,
    state: RwLock<WorkerState>,
    handle: Arc<dyn WorkerHandle>,
    cancellation: CancellationToken,
}

/// The Worker Registry. Cheap to clone; internal state is reference
/// counted behind an `Arc<DashMap<..>>`.
#[derive(Clone)]
pub struct WorkerRegistry {
    workers: Arc<DashMap<String, RegisteredWorker>>,
    breakers: Arc<BreakerPool>,
}

impl WorkerRegistry {
    pub fn new(breakers: Arc<BreakerPool>) -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
            breakers,
        }
    }

    /// Register a worker, rejecting a duplicate name or a dependency that
    /// is not itself registered and healthy.
    #[tracing::instrument(skip(self, handle), fields(worker = %def.name))]
    pub async fn register(&self, def: WorkerDef, handle: Arc<dyn WorkerHandle>) -> Result<(), RegisterError> {
        if self.workers.contains_key(&def.name) {
            return Err(RegisterError::Duplicate(def.name.clone()));
        }
        for dep in &def.dependencies {
            if !self.workers.contains_key(dep) {
                return Err(RegisterError::MissingDependency(dep.clone()));
            }
            if !self.is_healthy(dep).await {
                return Err(RegisterError::UnhealthyDependency(dep.clone()));
            }
        }
        let name = def.name.clone();
        self.workers.insert(
            name,
            RegisteredWorker {
                def,
                state: RwLock::new(WorkerState::default()),
                handle,
                cancellation: CancellationToken::new(),
            },
        );
        Ok(())
    }

    /// Remove a worker and cancel any inflight dispatch calls bound to it.
    #[tracing::instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> bool {
        match self.workers.remove(name) {
            Some((_, worker)) => {
                worker.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancellation token a dispatch call should race against so an
    /// in-flight invocation is aborted if its worker is unregistered.
    pub fn cancellation_token(&self, name: &str) -> Option<CancellationToken> {
        self.workers.get(name).map(|e| e.cancellation.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn def(&self, name: &str) -> Option<WorkerDef> {
        self.workers.get(name).map(|e| e.def.clone())
    }

    pub fn handle(&self, name: &str) -> Option<Arc<dyn WorkerHandle>> {
        self.workers.get(name).map(|e| Arc::clone(&e.handle))
    }

    pub async fn state(&self, name: &str) -> Option<WorkerState> {
        let entry = self.workers.get(name)?;
        Some(entry.state.read().await.clone())
    }

    /// Select the best worker for a capability, sorted by lowest inflight
    /// load among ready workers advertising the capability (§4.2).
    pub async fn find_by_capability(&self, capability: &str) -> Option<String> {
        let mut candidates = Vec::new();
        for entry in self.workers.iter() {
            if !entry.def.capabilities.iter().any(|c| c == capability) {
                continue;
            }
            let state = entry.state.read().await;
            if state.status == WorkerStatus::Ready || state.status == WorkerStatus::Degraded {
                candidates.push((entry.key().clone(), state.inflight));
            }
        }
        candidates.sort_by_key(|(_, inflight)| *inflight);
        candidates.into_iter().next().map(|(name, _)| name)
    }

    /// Health as known right now, without forcing an inline probe; cached
    /// state is authoritative between probe ticks (§4.2: "cached within
    /// `2 x probeInterval`").
    pub async fn is_healthy(&self, name: &str) -> bool {
        match self.state(name).await {
            Some(state) => matches!(state.status, WorkerStatus::Ready | WorkerStatus::Degraded),
            None => false,
        }
    }

    /// Record a probe outcome, applying the failover policy if the
    /// worker's failure threshold is crossed. Public so callers that run
    /// their own probe cadence (e.g. a CLI `register-worker` that probes
    /// once before accepting traffic) can feed results in directly.
    pub async fn mark_probe_result(&self, name: &str, healthy: bool) {
        let Some(entry) = self.workers.get(name) else {
            return;
        };
        let mut state = entry.state.write().await;
        state.last_probe_at = Some(chrono::Utc::now());
        if healthy {
            state.consecutive_failures = 0;
            if state.status != WorkerStatus::Failed {
                state.status = WorkerStatus::Ready;
            } else {
                state.status = WorkerStatus::Degraded;
            }
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= entry.def.failure_threshold {
                tracing::warn!(worker = name, policy = ?entry.def.failover_policy, "worker unhealthy, applying failover policy");
                match entry.def.failover_policy {
                    FailoverPolicy::Restart => {
                        state.restart_count += 1;
                        state.status = WorkerStatus::Starting;
                        state.consecutive_failures = 0;
                    }
                    FailoverPolicy::CircuitBreaker => {
                        state.status = WorkerStatus::Failed;
                        // "dispatch" matches DispatcherConfig::default's operation label.
                        self.breakers.trip(name, "dispatch");
                    }
                    FailoverPolicy::Replace | FailoverPolicy::None => {
                        state.status = WorkerStatus::Failed;
                    }
                }
            } else {
                state.status = WorkerStatus::Degraded;
            }
        }
    }

    pub async fn inc_inflight(&self, name: &str) {
        if let Some(entry) = self.workers.get(name) {
            entry.state.write().await.inflight += 1;
        }
    }

    pub async fn dec_inflight(&self, name: &str) {
        if let Some(entry) = self.workers.get(name) {
            let mut state = entry.state.write().await;
            state.inflight = state.inflight.saturating_sub(1);
        }
    }

    /// Spawn an independent probe loop for every currently-registered
    /// worker at its configured `probeInterval`. Returns a handle whose
    /// drop, or whose `shutdown` flag, stops all loops.
    pub fn spawn_probes(self: &Arc<Self>) -> ProbeSupervisor {
        let shutdown = Arc::new(AtomicBool::new(false));
        for entry in self.workers.iter() {
            let name = entry.key().clone();
            let interval = Duration::from_millis(entry.def.probe_interval_ms.max(100));
            let registry = Arc::clone(self);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let Some(handle) = registry.handle(&name) else {
                        break;
                    };
                    let healthy = tokio::time::timeout(interval, handle.probe())
                        .await
                        .unwrap_or(false);
                    registry.mark_probe_result(&name, healthy).await;
                }
            });
        }
        ProbeSupervisor { shutdown }
    }
}

/// Controls the probe loops spawned by [`WorkerRegistry::spawn_probes`].
pub struct ProbeSupervisor {
    shutdown: Arc<AtomicBool>,
}

impl ProbeSupervisor {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
