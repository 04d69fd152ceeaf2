//! Adaptive back-pressure: a `maxConcurrent` slot budget per worker that
//! decays when observed latency climbs above target and recovers as it
//! falls back (§4.6, last paragraph). Generalized from
//! `Sentinel::schedule_dispatch_backoff`'s single global exponential
//! backoff to a per-worker decaying semaphore.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct WorkerBudget {
    semaphore: Arc<Semaphore>,
    max_concurrent: u32,
    current_limit: AtomicU32,
}

impl WorkerBudget {
    pub fn new(max_concurrent: u32) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            max_concurrent,
            current_limit: AtomicU32::new(max_concurrent),
        }
    }

    /// Reserve a slot; `None` means the worker is at its concurrency
    /// limit right now (`Overloaded`, §4.6 step 4).
    pub fn try_reserve(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.try_acquire().ok()
    }

    /// Reduce the effective concurrency limit by 20%, floor of 1, in
    /// response to sustained elevated latency.
    pub fn decay(&self) {
        let current = self.current_limit.load(Ordering::Relaxed);
        let reduced = ((current as f64) * 0.8).floor().max(1.0) as u32;
        if reduced < current {
            self.semaphore.forget_permits((current - reduced) as usize);
            self.current_limit.store(reduced, Ordering::Relaxed);
        }
    }

    /// Restore one permit toward `max_concurrent` as latency recovers.
    pub fn recover(&self) {
        let current = self.current_limit.load(Ordering::Relaxed);
        if current < self.max_concurrent {
            self.semaphore.add_permits(1);
            self.current_limit.store(current + 1, Ordering::Relaxed);
        }
    }

    pub fn current_limit(&self) -> u32 {
        self.current_limit.load(Ordering::Relaxed)
    }
}

/// Decides decay/recover transitions from a rolling average vs. a target.
pub fn should_decay(rolling_avg_ms: f64, target_ms: f64) -> bool {
    target_ms > 0.0 && rolling_avg_ms > target_ms * 1.2
}

pub fn should_recover(rolling_avg_ms: f64, target_ms: f64) -> bool {
    target_ms <= 0.0 || rolling_avg_ms <= target_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_reserve_respects_limit() {
        let budget = WorkerBudget::new(2);
        let p1 = budget.try_reserve();
        let p2 = budget.try_reserve();
        let p3 = budget.try_reserve();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(p3.is_none());
    }

    #[test]
    fn decay_reduces_limit_by_twenty_percent() {
        let budget = WorkerBudget::new(10);
        budget.decay();
        assert_eq!(budget.current_limit(), 8);
    }

    #[test]
    fn decay_floors_at_one() {
        let budget = WorkerBudget::new(1);
        budget.decay();
        assert_eq!(budget.current_limit(), 1);
    }

    #[test]
    fn recover_restores_toward_max() {
        let budget = WorkerBudget::new(10);
        budget.decay();
        assert_eq!(budget.current_limit(), 8);
        budget.recover();
        assert_eq!(budget.current_limit(), 9);
    }

    #[test]
    fn decay_threshold_logic() {
        assert!(should_decay(130.0, 100.0));
        assert!(!should_decay(110.0, 100.0));
        assert!(should_recover(90.0, 100.0));
    }
}
