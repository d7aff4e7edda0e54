//! Static configuration.
//!
//! Loaded once at startup from `shardmesh.toml`, held in a global
//! [`ArcSwap`] so a reload can swap in a new snapshot without taking every
//! reader through a lock (teacher pattern: `pgdog::config`).

use std::{fs::read_to_string, path::Path, sync::Arc};

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Current configuration snapshot.
pub fn config() -> Arc<Config> {
    CONFIG.load_full()
}

/// Load configuration from a TOML file and install it as current.
pub fn load(path: &Path) -> Result<Arc<Config>> {
    let text = read_to_string(path)
        .map_err(|e| Error::Internal(format!("reading config {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&text)
        .map_err(|e| Error::InvalidPolicy(format!("parsing config {}: {e}", path.display())))?;
    set(config)
}

/// Install a configuration snapshot as current, e.g. after an admin reload.
pub fn set(config: Config) -> Result<Arc<Config>> {
    let config = Arc::new(config);
    CONFIG.store(config.clone());
    Ok(config)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub sharding: Sharding,
    pub cache: CacheDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: General::default(),
            sharding: Sharding::default(),
            cache: CacheDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct General {
    /// HTTP listen port for `/sql`, `/sql/batch`, `/sql/txn`.
    pub listen_port: u16,
    /// Listen port for `/health` and `/metrics`.
    pub metrics_port: u16,
    /// Opaque secret handed to the external auth validator.
    pub jwt_secret: String,
    /// Max connections held open per shard in the gateway's pool.
    pub max_connections_per_shard: usize,
    /// Idle session sweep interval, in milliseconds.
    pub session_sweep_interval_ms: u64,
    /// Idle session TTL before eviction, in milliseconds.
    pub session_idle_ttl_ms: u64,
    /// Circuit breaker: consecutive failures before opening.
    pub breaker_failure_threshold: u32,
    /// Circuit breaker: cooldown before a half-open trial, in milliseconds.
    pub breaker_cooldown_ms: u64,
    /// Shard health sampling cadence, in milliseconds (>= 30_000 per spec).
    pub health_check_interval_ms: u64,
    /// Open transactions idle longer than this are auto-rolled-back.
    pub transaction_idle_ms: u64,
    /// Cadence of the transaction-expiry sweep, in milliseconds.
    pub transaction_sweep_interval_ms: u64,
}

impl Default for General {
    fn default() -> Self {
        Self {
            listen_port: 3306,
            metrics_port: 9090,
            jwt_secret: String::new(),
            max_connections_per_shard: 20,
            session_sweep_interval_ms: 60_000,
            session_idle_ttl_ms: 300_000,
            breaker_failure_threshold: 3,
            breaker_cooldown_ms: 5_000,
            health_check_interval_ms: 30_000,
            transaction_idle_ms: 600_000,
            transaction_sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Sharding {
    /// Initial number of hash-range shards created at bootstrap.
    pub shard_count: u32,
    /// Hard upper bound for per-shard storage, in bytes.
    pub max_shard_size_bytes: u64,
    /// Directory holding each shard's embedded SQLite file.
    pub data_dir: String,
    /// Backfill page size used by the split orchestrator.
    pub backfill_page_size: usize,
    /// Tail replay batch size.
    pub tail_replay_limit: usize,
}

const GIB: u64 = 1024 * 1024 * 1024;

impl Default for Sharding {
    fn default() -> Self {
        Self {
            shard_count: 4,
            max_shard_size_bytes: 10 * GIB,
            data_dir: "./data".into(),
            backfill_page_size: 200,
            tail_replay_limit: 750,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDefaults {
    pub default_ttl_ms: u64,
    pub default_swr_ms: u64,
    pub processed_marker_ttl_ms: u64,
    pub event_batch_size: usize,
    pub event_batch_wait_ms: u64,
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            default_ttl_ms: 60_000,
            default_swr_ms: 300_000,
            processed_marker_ttl_ms: 600_000,
            event_batch_size: 50,
            event_batch_wait_ms: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.sharding.shard_count, config.sharding.shard_count);
    }

    #[test]
    fn global_config_updates_are_visible_to_new_readers() {
        let mut config = (*config()).clone();
        config.sharding.shard_count = 99;
        set(config).unwrap();
        assert_eq!(config().sharding.shard_count, 99);
    }
}
