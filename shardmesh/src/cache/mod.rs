//! C6: Cache Coherence Engine.
//!
//! A materialized-query cache with three consistency modes (strong,
//! bounded, stale-while-revalidate), kept coherent with the shards through
//! C4. Grounded on the teacher's LRU/TTL pool-cache idiom, backed here by
//! `dashmap` for lock-free concurrent entries (spec §4.6).

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::CacheDefaults;
use crate::error::Result;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Strong,
    Bounded,
    Cached,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub data: Value,
    pub version: i64,
    pub fresh_until: i64,
    pub swr_until: i64,
    pub shard_id: String,
}

impl CacheEntry {
    fn expired(&self, now: i64) -> bool {
        now >= self.swr_until
    }
}

/// Materialized-query key: `<tenantId>:q:<table>:<16-hex hash>`.
pub fn query_key(tenant_id: &str, table: &str, sql: &str, params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hasher.update(serde_json::to_vec(params).unwrap_or_default());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{tenant_id}:q:{table}:{hex}")
}

pub fn row_key(table: &str, pk: &str) -> String {
    format!("t:{table}:id:{pk}")
}

pub fn index_key(table: &str, col: &str, val: &str) -> String {
    format!("idx:{table}:{col}:{val}")
}

pub struct WarmEntry {
    pub key: String,
    pub data: Value,
    pub shard_id: String,
    pub ttl_ms: Option<u64>,
    pub swr_ms: Option<u64>,
}

/// Materialized-query cache (C6).
pub struct CacheEngine {
    entries: DashMap<String, CacheEntry>,
    defaults: CacheDefaults,
}

impl CacheEngine {
    pub fn new(defaults: CacheDefaults) -> Self {
        Self {
            entries: DashMap::new(),
            defaults,
        }
    }

    /// Returns the entry if present and not past `swrUntil`; expired
    /// entries are evicted on access (spec §3 invariant).
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = now_ms();
        match self.entries.get(key) {
            Some(entry) if !entry.expired(now) => Some(entry.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn write_through(&self, key: &str, shard_id: &str, data: Value, ttl_ms: u64, swr_ms: u64) -> CacheEntry {
        let now = now_ms();
        let entry = CacheEntry {
            data,
            version: now,
            fresh_until: now + ttl_ms as i64,
            swr_until: now + swr_ms.max(ttl_ms) as i64,
            shard_id: shard_id.to_string(),
        };
        self.entries.insert(key.to_string(), entry.clone());
        entry
    }

    pub fn delete_many(&self, keys: &[String]) {
        for key in keys {
            self.entries.remove(key);
        }
    }

    /// Delete every key beginning with `prefix` (invalidation, spec §4.6).
    pub fn delete_by_prefix(&self, prefix: &str) {
        let matches: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        for key in matches {
            self.entries.remove(&key);
        }
    }

    pub fn warm_cache(&self, entries: Vec<WarmEntry>) {
        for e in entries {
            let ttl = e.ttl_ms.unwrap_or(self.defaults.default_ttl_ms);
            let swr = e.swr_ms.unwrap_or(self.defaults.default_swr_ms);
            self.write_through(&e.key, &e.shard_id, e.data, ttl, swr);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn warm_for_test(&self, key: &str, data: Value) {
        self.write_through(key, "shard-test", data, 60_000, 300_000);
    }

    #[cfg(test)]
    pub fn get_for_test(&self, key: &str) -> Option<Value> {
        self.get(key).map(|e| e.data)
    }

    /// Orchestrates the read path per spec §4.6: strong bypasses and never
    /// repopulates; bounded serves-then-write-through; cached serves stale
    /// while kicking off an async revalidation.
    ///
    /// `fetch` re-executes the underlying query against the shard; it must
    /// be cheaply cloneable/`Fn` because SWR may invoke it a second time in
    /// the background after already answering the caller with stale data.
    pub async fn read<F, Fut>(
        cache: &Arc<CacheEngine>,
        mode: ReadMode,
        key: &str,
        shard_id: &str,
        ttl_ms: u64,
        swr_ms: u64,
        fetch: F,
    ) -> Result<Value>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        match mode {
            ReadMode::Strong => fetch().await,
            ReadMode::Bounded => {
                let now = now_ms();
                if let Some(entry) = cache.get(key) {
                    if now < entry.fresh_until {
                        return Ok(entry.data);
                    }
                }
                let data = fetch().await?;
                cache.write_through(key, shard_id, data.clone(), ttl_ms, swr_ms);
                Ok(data)
            }
            ReadMode::Cached => {
                let now = now_ms();
                if let Some(entry) = cache.get(key) {
                    if now < entry.fresh_until {
                        return Ok(entry.data);
                    }
                    if now < entry.swr_until {
                        let cache = cache.clone();
                        let key = key.to_string();
                        let shard_id = shard_id.to_string();
                        tokio::spawn(async move {
                            if let Ok(fresh) = fetch().await {
                                cache.write_through(&key, &shard_id, fresh, ttl_ms, swr_ms);
                            }
                        });
                        return Ok(entry.data);
                    }
                }
                let data = fetch().await?;
                cache.write_through(key, shard_id, data.clone(), ttl_ms, swr_ms);
                Ok(data)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_is_evicted_on_access() {
        let cache = CacheEngine::new(CacheDefaults::default());
        cache.write_through("k", "s", Value::from(1), 0, 0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn prefix_delete_removes_matching_keys_only() {
        let cache = CacheEngine::new(CacheDefaults::default());
        cache.write_through("t1:q:users:aaa", "s", Value::from(1), 60_000, 300_000);
        cache.write_through("t1:q:orders:bbb", "s", Value::from(2), 60_000, 300_000);
        cache.delete_by_prefix("t1:q:users:");
        assert!(cache.get("t1:q:users:aaa").is_none());
        assert!(cache.get("t1:q:orders:bbb").is_some());
    }

    #[tokio::test]
    async fn bounded_read_serves_fresh_without_refetching() {
        let cache = Arc::new(CacheEngine::new(CacheDefaults::default()));
        cache.write_through("k", "s", Value::from("cached"), 60_000, 300_000);
        let result = CacheEngine::read(&cache, ReadMode::Bounded, "k", "s", 60_000, 300_000, || async {
            Ok(Value::from("fresh-from-shard"))
        })
        .await
        .unwrap();
        assert_eq!(result, Value::from("cached"));
    }

    #[tokio::test]
    async fn strong_read_bypasses_and_does_not_repopulate() {
        let cache = Arc::new(CacheEngine::new(CacheDefaults::default()));
        let result = CacheEngine::read(&cache, ReadMode::Strong, "k", "s", 60_000, 300_000, || async {
            Ok(Value::from("from-shard"))
        })
        .await
        .unwrap();
        assert_eq!(result, Value::from("from-shard"));
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn cached_read_serves_stale_and_schedules_revalidation() {
        let cache = Arc::new(CacheEngine::new(CacheDefaults::default()));
        cache.write_through("k", "s", Value::from("stale"), 0, 300_000);
        let result = CacheEngine::read(&cache, ReadMode::Cached, "k", "s", 60_000, 300_000, || async {
            Ok(Value::from("revalidated"))
        })
        .await
        .unwrap();
        assert_eq!(result, Value::from("stale"));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(cache.get("k").unwrap().data, Value::from("revalidated"));
    }
}
