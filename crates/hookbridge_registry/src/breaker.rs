//! Circuit breaker pool: one three-state machine per `(worker, operation)`
//! key (§4.3). Generalized from `Sentinel::check_circuit_breaker`/
//! `record_success`/`record_failure`'s single-worker-queue breaker to a
//! keyed pool held by the Registry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hookbridge_protocol::BreakerState;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    config: BreakerConfig,
}

impl Breaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            config,
        }
    }

    /// Evaluate whether a call is currently admitted, transitioning
    /// `open -> halfOpen` on the first call after the recovery window.
    fn admit(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|opened| Utc::now().signed_duration_since(opened))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_default();
                if elapsed >= self.config.recovery {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        match self.state {
            BreakerState::HalfOpen => self.trip(),
            BreakerState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.trip()
            }
            _ => {}
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Utc::now());
    }
}

/// Keyed pool of circuit breakers, one per `(worker, operation)`.
pub struct BreakerPool {
    breakers: DashMap<(String, String), Mutex<Breaker>>,
    default_config: BreakerConfig,
}

impl BreakerPool {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    fn key(worker: &str, operation: &str) -> (String, String) {
        (worker.to_string(), operation.to_string())
    }

    /// Returns `true` if the call is admitted (breaker not open).
    pub fn admit(&self, worker: &str, operation: &str) -> bool {
        let entry = self
            .breakers
            .entry(Self::key(worker, operation))
            .or_insert_with(|| Mutex::new(Breaker::new(self.default_config)));
        entry.lock().expect("breaker lock poisoned").admit()
    }

    pub fn record_success(&self, worker: &str, operation: &str) {
        if let Some(entry) = self.breakers.get(&Self::key(worker, operation)) {
            entry.lock().expect("breaker lock poisoned").record_success();
        }
    }

    pub fn record_failure(&self, worker: &str, operation: &str) {
        let entry = self
            .breakers
            .entry(Self::key(worker, operation))
            .or_insert_with(|| Mutex::new(Breaker::new(self.default_config)));
        entry.lock().expect("breaker lock poisoned").record_failure();
    }

    pub fn state(&self, worker: &str, operation: &str) -> BreakerState {
        self.breakers
            .get(&Self::key(worker, operation))
            .map(|entry| entry.lock().expect("breaker lock poisoned").state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Force-reset a breaker to `closed` (administrative `circuit-reset`
    /// CLI command, §6).
    pub fn reset(&self, worker: &str, operation: &str) {
        if let Some(entry) = self.breakers.get(&Self::key(worker, operation)) {
            entry.lock().expect("breaker lock poisoned").record_success();
        }
    }

    /// Force-open a breaker, bypassing the failure-count threshold. Used
    /// when a worker's failover policy is `CircuitBreaker` and the
    /// registry's own health bookkeeping (not a dispatch failure) decides
    /// the worker should stop taking traffic.
    pub fn trip(&self, worker: &str, operation: &str) {
        let entry = self
            .breakers
            .entry(Self::key(worker, operation))
            .or_insert_with(|| Mutex::new(Breaker::new(self.default_config)));
        entry.lock().expect("breaker lock poisoned").trip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(threshold: u32) -> BreakerPool {
        BreakerPool::new(BreakerConfig {
            failure_threshold: threshold,
            recovery: Duration::from_millis(20),
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let pool = pool(3);
        assert!(pool.admit("w1", "dispatch"));
        pool.record_failure("w1", "dispatch");
        pool.record_failure("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Closed);
        pool.record_failure("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Open);
        assert!(!pool.admit("w1", "dispatch"));
    }

    #[test]
    fn half_open_after_recovery_then_closes_on_success() {
        let pool = pool(1);
        pool.record_failure("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert!(pool.admit("w1", "dispatch"));
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::HalfOpen);
        pool.record_success("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let pool = pool(1);
        pool.record_failure("w1", "dispatch");
        std::thread::sleep(Duration::from_millis(30));
        assert!(pool.admit("w1", "dispatch"));
        pool.record_failure("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Open);
    }

    #[test]
    fn independent_keys_do_not_interfere() {
        let pool = pool(1);
        pool.record_failure("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Open);
        assert_eq!(pool.state("w1", "probe"), BreakerState::Closed);
        assert_eq!(pool.state("w2", "dispatch"), BreakerState::Closed);
    }

    #[test]
    fn reset_forces_closed() {
        let pool = pool(1);
        pool.record_failure("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Open);
        pool.reset("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Closed);
    }

    #[test]
    fn trip_opens_without_threshold_failures() {
        let pool = pool(10);
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Closed);
        pool.trip("w1", "dispatch");
        assert_eq!(pool.state("w1", "dispatch"), BreakerState::Open);
        assert!(!pool.admit("w1", "dispatch"));
    }
}
