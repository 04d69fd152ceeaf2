//! Response Cache & Single-Flight (§4.4): a bounded LRU keyed by request
//! fingerprint with TTL expiry, plus in-progress-call deduplication so
//! concurrent duplicate callers share one worker invocation.

use dashmap::DashMap;
use hookbridge_protocol::ProtocolError;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry {
    payload: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

type InflightResult = Result<serde_json::Value, String>;

/// The Response Cache. One instance is shared across the Dispatcher.
pub struct ResponseCache {
    lru: Mutex<LruCache<String, Entry>>,
    default_ttl: Duration,
    inflight: DashMap<String, broadcast::Sender<InflightResult>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl ResponseCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            inflight: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut lru = self.lru.lock().expect("cache lock poisoned");
        match lru.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.payload.clone()),
            Some(_) => {
                lru.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, payload: serde_json::Value, ttl: Option<Duration>) {
        let mut lru = self.lru.lock().expect("cache lock poisoned");
        lru.put(
            key,
            Entry {
                payload,
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Invalidate every key whose string form contains `pattern`.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut lru = self.lru.lock().expect("cache lock poisoned");
        let matching: Vec<String> = lru
            .iter()
            .filter(|(k, _)| k.contains(pattern))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matching {
            lru.pop(key);
        }
        matching.len()
    }

    pub fn len(&self) -> usize {
        self.lru.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `compute` under single-flight protection for `key`: if another
    /// caller is already computing this key, await its result instead of
    /// invoking `compute` again. Returns `(payload, was_cache_hit)`.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: String,
        cacheable: bool,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<(serde_json::Value, bool), ProtocolError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, ProtocolError>>,
    {
        if let Some(cached) = self.get(&key) {
            return Ok((cached, true));
        }

        // Join an in-progress call for this key, if one exists.
        let mut receiver = None;
        {
            if let Some(sender) = self.inflight.get(&key) {
                receiver = Some(sender.subscribe());
            }
        }
        if let Some(mut rx) = receiver {
            return match rx.recv().await {
                Ok(Ok(value)) => Ok((value, false)),
                Ok(Err(message)) => Err(ProtocolError::Internal(message)),
                Err(_) => Err(ProtocolError::Internal("single-flight leader dropped".into())),
            };
        }

        let (tx, _rx) = broadcast::channel(1);
        self.inflight.insert(key.clone(), tx.clone());

        let result = compute().await;

        self.inflight.remove(&key);
        match &result {
            Ok(value) => {
                let _ = tx.send(Ok(value.clone()));
                if cacheable {
                    self.insert(key, value.clone(), ttl);
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e.to_string()));
            }
        }

        result.map(|value| (value, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn insert_then_get_roundtrips() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.insert("k1".into(), serde_json::json!({"a": 1}), None);
        assert_eq!(cache.get("k1"), Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = ResponseCache::new(10, Duration::from_millis(10));
        cache.insert("k1".into(), serde_json::json!(1), None);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn lru_evicts_beyond_capacity() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), serde_json::json!(1), None);
        cache.insert("b".into(), serde_json::json!(2), None);
        cache.insert("c".into(), serde_json::json!(3), None);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn invalidate_matches_substring() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.insert("worker1:pre_tool:sess".into(), serde_json::json!(1), None);
        cache.insert("worker2:pre_tool:sess".into(), serde_json::json!(2), None);
        let evicted = cache.invalidate("worker1");
        assert_eq!(evicted, 1);
        assert!(cache.get("worker1:pre_tool:sess").is_none());
        assert!(cache.get("worker2:pre_tool:sess").is_some());
    }

    #[tokio::test]
    async fn get_or_compute_caches_on_success() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&calls);
        let (value, hit) = cache
            .get_or_compute("k".into(), true, None, || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"v": 1}))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(value, serde_json::json!({"v": 1}));
        let (_, hit2) = cache
            .get_or_compute("k".into(), true, None, || async { unreachable!() })
            .await
            .unwrap();
        assert!(hit2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_calls_share_one_compute() {
        let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared".into(), true, None, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(serde_json::json!({"v": 42}))
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            let (value, _) = h.await.unwrap();
            assert_eq!(value, serde_json::json!({"v": 42}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_delivered_to_every_awaiter_and_not_cached() {
        let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("k".into(), true, None, || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(ProtocolError::Internal("boom".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let follower = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("k".into(), true, None, || async { unreachable!() })
                    .await
            })
        };
        assert!(leader.await.unwrap().is_err());
        assert!(follower.await.unwrap().is_err());
        assert!(cache.get("k").is_none());
    }
}
