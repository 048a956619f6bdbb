//! Query cache (spec §4.6): content-addressed memoization with TTL, LRU
//! eviction, and single-flight execution per fingerprint.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::utils::AppError;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    last_accessed: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

pub struct QueryCache<V: Clone + Send + Sync + 'static> {
    entries: DashMap<String, CacheEntry<V>>,
    /// Per-fingerprint async lock realizing single-flight: a caller holds
    /// the lock while computing so concurrent callers for the same
    /// fingerprint queue behind it and then observe the freshly stored value.
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<V> {
        if let Some(mut entry) = self.entries.get_mut(fingerprint)
            && entry.stored_at.elapsed() <= self.ttl {
                entry.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        self.entries.remove(fingerprint);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn store(&self, fingerprint: String, value: V) {
        let now = Instant::now();
        self.entries.insert(fingerprint, CacheEntry { value, stored_at: now, last_accessed: now });
        self.evict_if_oversize();
    }

    fn evict_if_oversize(&self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let mut by_access: Vec<(String, Instant)> =
            self.entries.iter().map(|e| (e.key().clone(), e.value().last_accessed)).collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);
        let overflow = self.entries.len() - self.max_entries;
        for (key, _) in by_access.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.len(),
            ttl_seconds: self.ttl.as_secs(),
            max_entries: self.max_entries,
        }
    }

    /// `None` flushes everything; `Some(prefix)` flushes fingerprints whose
    /// hex key starts with `prefix` (spec §9 open question 2: matched on
    /// the fingerprint itself, not the metric name).
    pub fn invalidate(&self, prefix: Option<&str>) -> usize {
        match prefix {
            None => {
                let count = self.entries.len();
                self.entries.clear();
                count
            },
            Some(prefix) => {
                let keys: Vec<String> =
                    self.entries.iter().filter(|e| e.key().starts_with(prefix)).map(|e| e.key().clone()).collect();
                for key in &keys {
                    self.entries.remove(key);
                }
                keys.len()
            },
        }
    }

    /// Looks up `fingerprint`; on miss, runs `compute` under a per-key lock
    /// so concurrent callers share a single execution (spec §4.6, §8
    /// property 4). Returns `(value, was_hit)`.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &str, compute: F) -> Result<(V, bool), AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, AppError>>,
    {
        if let Some(hit) = self.lookup(fingerprint) {
            return Ok((hit, true));
        }

        let lock = self.locks.entry(fingerprint.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone();
        let _guard = lock.lock().await;

        // Double-check: another caller may have populated the cache while
        // we waited for the lock.
        if let Some(hit) = self.lookup(fingerprint) {
            return Ok((hit, true));
        }

        let value = compute().await?;
        self.store(fingerprint.to_string(), value.clone());
        Ok((value, false))
    }
}

pub type SerializableMap = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn store_then_lookup_within_ttl_hits() {
        let cache: QueryCache<i32> = QueryCache::new(Duration::from_secs(30), 500);
        cache.store("fp1".to_string(), 42);
        assert_eq!(cache.lookup("fp1"), Some(42));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache: QueryCache<i32> = QueryCache::new(Duration::from_millis(10), 500);
        cache.store("fp1".to_string(), 42);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.lookup("fp1"), None);
    }

    #[tokio::test]
    async fn single_flight_runs_compute_once_under_concurrency() {
        let cache = Arc::new(QueryCache::<i32>::new(Duration::from_secs(30), 500));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("fp", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, AppError>(7)
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().0);
        }

        assert!(results.iter().all(|v| *v == 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_by_fingerprint_prefix() {
        let cache: QueryCache<i32> = QueryCache::new(Duration::from_secs(30), 500);
        cache.store("abc123".to_string(), 1);
        cache.store("abcdef".to_string(), 2);
        cache.store("zzzzzz".to_string(), 3);
        let removed = cache.invalidate(Some("abc"));
        assert_eq!(removed, 2);
        assert_eq!(cache.lookup("zzzzzz"), Some(3));
    }
}
