//! C2: Table Policy Store.
//!
//! Per-table configuration: primary key, shard-by column, and cache mode.
//! Absent tables get a default `bounded` policy. Backed by an in-process
//! TTL cache (teacher idiom: policy caches use TTL + explicit clear on
//! update, see `pgdog::config`).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::CacheDefaults;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Strong,
    Bounded,
    Cached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    pub mode: CacheMode,
    pub ttl_ms: u64,
    pub swr_ms: u64,
    #[serde(default)]
    pub always_strong_columns: std::collections::BTreeSet<String>,
}

impl CachePolicy {
    pub fn default_bounded(defaults: &CacheDefaults) -> Self {
        Self {
            mode: CacheMode::Bounded,
            ttl_ms: defaults.default_ttl_ms,
            swr_ms: defaults.default_swr_ms,
            always_strong_columns: Default::default(),
        }
    }

    /// §3 invariant: non-strong modes require `swr_ms > ttl_ms > 0`.
    pub fn validate(&self) -> Result<()> {
        if self.mode != CacheMode::Strong && !(self.swr_ms > self.ttl_ms && self.ttl_ms > 0) {
            return Err(Error::InvalidPolicy(
                "non-strong cache mode requires swrMs > ttlMs > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePolicy {
    pub pk: String,
    pub shard_by: Option<String>,
    pub cache: CachePolicy,
}

impl TablePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.pk.trim().is_empty() {
            return Err(Error::InvalidPolicy("pk must be set".into()));
        }
        self.cache.validate()
    }
}

struct CachedEntry {
    policy: TablePolicy,
    inserted_at: Instant,
}

/// Per-table configuration store (C2).
pub struct TablePolicyStore {
    policies: DashMap<String, TablePolicy>,
    read_cache: DashMap<String, CachedEntry>,
    cache_ttl: Duration,
    defaults: CacheDefaults,
}

impl TablePolicyStore {
    pub fn new(defaults: CacheDefaults) -> Self {
        Self {
            policies: DashMap::new(),
            read_cache: DashMap::new(),
            cache_ttl: Duration::from_secs(5 * 60),
            defaults,
        }
    }

    pub fn get_table_policy(&self, table: &str) -> TablePolicy {
        if let Some(entry) = self.read_cache.get(table) {
            if entry.inserted_at.elapsed() < self.cache_ttl {
                return entry.policy.clone();
            }
        }
        let policy = self
            .policies
            .get(table)
            .map(|p| p.clone())
            .unwrap_or_else(|| TablePolicy {
                pk: "id".into(),
                shard_by: None,
                cache: CachePolicy::default_bounded(&self.defaults),
            });
        self.read_cache.insert(
            table.to_string(),
            CachedEntry {
                policy: policy.clone(),
                inserted_at: Instant::now(),
            },
        );
        policy
    }

    pub fn get_table_policies(&self) -> Vec<(String, TablePolicy)> {
        self.policies
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn update_table_policy(&self, table: &str, policy: TablePolicy) -> Result<()> {
        policy.validate()?;
        self.policies.insert(table.to_string(), policy);
        self.read_cache.remove(table);
        Ok(())
    }

    /// Validate every stored policy; returns the first failure, if any.
    pub fn validate_config(&self) -> Result<()> {
        for entry in self.policies.iter() {
            entry.value().validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_table_gets_default_bounded_policy() {
        let store = TablePolicyStore::new(CacheDefaults::default());
        let policy = store.get_table_policy("users");
        assert_eq!(policy.pk, "id");
        assert_eq!(policy.cache.mode, CacheMode::Bounded);
    }

    #[test]
    fn update_clears_read_cache() {
        let store = TablePolicyStore::new(CacheDefaults::default());
        let _ = store.get_table_policy("users");
        store
            .update_table_policy(
                "users",
                TablePolicy {
                    pk: "id".into(),
                    shard_by: Some("tenant_id".into()),
                    cache: CachePolicy::default_bounded(&CacheDefaults::default()),
                },
            )
            .unwrap();
        let policy = store.get_table_policy("users");
        assert_eq!(policy.shard_by.as_deref(), Some("tenant_id"));
    }

    #[test]
    fn invalid_non_strong_policy_is_rejected() {
        let store = TablePolicyStore::new(CacheDefaults::default());
        let bad = TablePolicy {
            pk: "id".into(),
            shard_by: None,
            cache: CachePolicy {
                mode: CacheMode::Bounded,
                ttl_ms: 1000,
                swr_ms: 500,
                always_strong_columns: Default::default(),
            },
        };
        assert!(store.update_table_policy("orders", bad).is_err());
    }
}
