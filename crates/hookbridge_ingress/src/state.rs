//! Shared application state threaded through every Axum handler via
//! `State<AppState>`, following the `State(engine): State<Arc<...>>`
//! extractor pattern used throughout `knhk-workflow-engine::api::rest`.

use hookbridge_dispatch::Dispatcher;
use hookbridge_metrics::PerformanceTracker;
use hookbridge_registry::WorkerRegistry;
use hookbridge_security::SecurityGate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub security: Arc<SecurityGate>,
    pub registry: Arc<WorkerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<PerformanceTracker>,
    pub connections: Arc<AtomicUsize>,
    pub max_connections: usize,
    pub started_at: Instant,
    pub bind_addr: String,
}

impl AppState {
    pub fn new(
        security: Arc<SecurityGate>,
        registry: Arc<WorkerRegistry>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<PerformanceTracker>,
        max_connections: usize,
        bind_addr: String,
    ) -> Self {
        Self {
            security,
            registry,
            dispatcher,
            metrics,
            connections: Arc::new(AtomicUsize::new(0)),
            max_connections,
            started_at: Instant::now(),
            bind_addr,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// `true` if a new duplex connection is admitted under `maxConnections`.
    pub fn try_admit_connection(&self) -> bool {
        let mut current = self.connections.load(Ordering::SeqCst);
        loop {
            if current >= self.max_connections {
                return false;
            }
            match self.connections.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_connection(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}
