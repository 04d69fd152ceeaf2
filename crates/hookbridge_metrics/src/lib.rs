//! Performance Tracker (§4.8): per-key timers feeding a ring of the last
//! 1000 samples, plus live hit/miss counters for `cacheHitRate` — always
//! computed from counters, never a placeholder constant (§9).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

const RING_CAPACITY: usize = 1000;

pub struct TimerHandle {
    key: String,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMetrics {
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct OverallMetrics {
    pub avg_exec_ms: f64,
    pub rps: f64,
    pub error_rate: f64,
    /// Effective throughput multiplier from cache/single-flight savings: a
    /// cache hit serves a request at negligible worker cost, so this scales
    /// from 1.0 at a 0% hit rate toward 2.0 as the hit rate approaches 1.0.
    pub optimization_factor: f64,
    pub cache_hit_rate: f64,
}

struct KeyRing {
    samples: VecDeque<u64>,
    errors: u64,
}

/// Tracks per-key latency samples and the global request/cache counters
/// feeding `getOverallMetrics` (§4.8).
pub struct PerformanceTracker {
    rings: DashMap<String, Mutex<KeyRing>>,
    cache_hits: Mutex<u64>,
    cache_misses: Mutex<u64>,
    requests: Mutex<u64>,
    errors: Mutex<u64>,
    started_at: Instant,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            rings: DashMap::new(),
            cache_hits: Mutex::new(0),
            cache_misses: Mutex::new(0),
            requests: Mutex::new(0),
            errors: Mutex::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn start_timer(&self, key: impl Into<String>) -> TimerHandle {
        TimerHandle {
            key: key.into(),
            started_at: Instant::now(),
        }
    }

    pub fn end_timer(&self, handle: TimerHandle, is_error: bool) -> u64 {
        let elapsed_ms = handle.started_at.elapsed().as_millis() as u64;
        *self.requests.lock() += 1;
        if is_error {
            *self.errors.lock() += 1;
        }
        let ring = self
            .rings
            .entry(handle.key)
            .or_insert_with(|| Mutex::new(KeyRing { samples: VecDeque::with_capacity(RING_CAPACITY), errors: 0 }));
        let mut ring = ring.lock();
        if ring.samples.len() >= RING_CAPACITY {
            ring.samples.pop_front();
        }
        ring.samples.push_back(elapsed_ms);
        if is_error {
            ring.errors += 1;
        }
        elapsed_ms
    }

    pub fn record_cache_hit(&self) {
        *self.cache_hits.lock() += 1;
    }

    pub fn record_cache_miss(&self) {
        *self.cache_misses.lock() += 1;
    }

    pub fn key_metrics(&self, key: &str) -> Option<KeyMetrics> {
        let entry = self.rings.get(key)?;
        let ring = entry.lock();
        if ring.samples.is_empty() {
            return Some(KeyMetrics::default());
        }
        let mut sorted: Vec<u64> = ring.samples.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        Some(KeyMetrics {
            count: count as u64,
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            mean_ms: sum as f64 / count as f64,
            p50_ms: percentile(&sorted, 0.50),
            p90_ms: percentile(&sorted, 0.90),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
        })
    }

    pub fn overall(&self) -> OverallMetrics {
        let requests = *self.requests.lock();
        let errors = *self.errors.lock();
        let hits = *self.cache_hits.lock();
        let misses = *self.cache_misses.lock();

        let mut total_ms = 0u64;
        let mut total_samples = 0u64;
        for entry in self.rings.iter() {
            let ring = entry.lock();
            total_ms += ring.samples.iter().sum::<u64>();
            total_samples += ring.samples.len() as u64;
        }

        let avg_exec_ms = if total_samples > 0 {
            total_ms as f64 / total_samples as f64
        } else {
            0.0
        };
        let elapsed_secs = self.started_at.elapsed().as_secs_f64().max(0.001);
        let rps = requests as f64 / elapsed_secs;
        let error_rate = if requests > 0 {
            errors as f64 / requests as f64
        } else {
            0.0
        };
        let cache_total = hits + misses;
        let cache_hit_rate = if cache_total > 0 {
            hits as f64 / cache_total as f64
        } else {
            0.0
        };
        let optimization_factor = 1.0 + cache_hit_rate;

        OverallMetrics {
            avg_exec_ms,
            rps,
            error_rate,
            optimization_factor,
            cache_hit_rate,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_a_sample() {
        let tracker = PerformanceTracker::new();
        let handle = tracker.start_timer("dispatch:w1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.end_timer(handle, false);
        let metrics = tracker.key_metrics("dispatch:w1").unwrap();
        assert_eq!(metrics.count, 1);
        assert!(metrics.mean_ms >= 5.0);
    }

    #[test]
    fn cache_hit_rate_is_computed_live() {
        let tracker = PerformanceTracker::new();
        assert_eq!(tracker.overall().cache_hit_rate, 0.0);
        tracker.record_cache_hit();
        tracker.record_cache_hit();
        tracker.record_cache_miss();
        let overall = tracker.overall();
        assert!((overall.cache_hit_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn optimization_factor_tracks_cache_hit_rate() {
        let tracker = PerformanceTracker::new();
        assert_eq!(tracker.overall().optimization_factor, 1.0);
        tracker.record_cache_hit();
        tracker.record_cache_hit();
        tracker.record_cache_miss();
        let overall = tracker.overall();
        assert!((overall.optimization_factor - (1.0 + 2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn error_rate_reflects_recorded_errors() {
        let tracker = PerformanceTracker::new();
        tracker.end_timer(tracker.start_timer("k"), false);
        tracker.end_timer(tracker.start_timer("k"), true);
        let overall = tracker.overall();
        assert!((overall.error_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ring_caps_at_1000_samples() {
        let tracker = PerformanceTracker::new();
        for _ in 0..(RING_CAPACITY + 10) {
            tracker.end_timer(tracker.start_timer("k"), false);
        }
        let metrics = tracker.key_metrics("k").unwrap();
        assert_eq!(metrics.count, RING_CAPACITY as u64);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let tracker = PerformanceTracker::new();
        for n in 1..=100u64 {
            let handle = TimerHandle { key: "k".into(), started_at: Instant::now() - std::time::Duration::from_millis(n) };
            tracker.end_timer(handle, false);
        }
        let metrics = tracker.key_metrics("k").unwrap();
        assert!(metrics.p50_ms <= metrics.p90_ms);
        assert!(metrics.p90_ms <= metrics.p95_ms);
        assert!(metrics.p95_ms <= metrics.p99_ms);
    }
}
