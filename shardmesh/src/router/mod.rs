//! C5: Router.
//!
//! Resolves a query to one authoritative shard using C1/C2, and enforces
//! dual-write fan-out while a split plan (C8) is active for a tenant.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::policy::{RoutingPolicyStore, ShardId, TablePolicyStore, TenantId};
use crate::storage::ShardRegistry;

/// Split-plan phase, as seen from the routing fabric's perspective. Defined
/// here (not in `split`) so the router has no dependency on the
/// orchestrator — C8 depends on C5, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    DualWrite,
    Backfill,
    Tailing,
    CutoverPending,
    Completed,
    RolledBack,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::RolledBack)
    }
}

#[derive(Debug, Clone)]
pub struct RoutingInfo {
    pub active: bool,
    pub source_shard: ShardId,
    pub target_shard: ShardId,
    pub phase: Phase,
}

/// Shared view of in-flight split plans, written by C8 and read by C5.
#[derive(Default)]
pub struct SplitState {
    by_tenant: DashMap<TenantId, RoutingInfo>,
}

impl SplitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: &str, info: RoutingInfo) {
        self.by_tenant.insert(tenant_id.to_string(), info);
    }

    pub fn clear(&self, tenant_id: &str) {
        self.by_tenant.remove(tenant_id);
    }

    pub fn get(&self, tenant_id: &str) -> Option<RoutingInfo> {
        self.by_tenant.get(tenant_id).map(|r| r.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardTarget {
    pub shard_id: ShardId,
    pub routing_reason: &'static str,
    pub load_balance_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardHealth {
    pub status: HealthStatus,
    pub capacity_utilization: f64,
    pub active_connections: u32,
    pub avg_response_time_ms: f64,
    pub error_rate: f64,
    pub last_check: chrono::DateTime<chrono::Utc>,
}

impl Default for ShardHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            capacity_utilization: 0.0,
            active_connections: 0,
            avg_response_time_ms: 0.0,
            error_rate: 0.0,
            last_check: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct RebalanceResult {
    pub moved_tenants: Vec<TenantId>,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
}

/// First two hex characters of `SHA-256(key)`.
pub fn hash_prefix(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!("{:02x}", digest[0])
}

fn stable_index(key: &str, modulus: usize) -> usize {
    if modulus == 0 {
        return 0;
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (n as usize) % modulus
}

pub struct Router {
    routing: Arc<RoutingPolicyStore>,
    tables: Arc<TablePolicyStore>,
    pub split_state: Arc<SplitState>,
    health: DashMap<ShardId, ShardHealth>,
}

impl Router {
    pub fn new(routing: Arc<RoutingPolicyStore>, tables: Arc<TablePolicyStore>) -> Self {
        Self {
            routing,
            tables,
            split_state: Arc::new(SplitState::new()),
            health: DashMap::new(),
        }
    }

    /// Resolution order per spec §4.5: explicit tenant assignment, then
    /// shard-by/hint hash range, then a stable hash of `tenant:table`.
    pub fn route_query(&self, tenant_id: &str, table: &str, shard_key_hint: Option<&str>) -> ShardTarget {
        let policy = self.routing.get_current_policy();

        if let Some(shard_id) = policy.tenants.get(tenant_id) {
            return ShardTarget {
                shard_id: shard_id.clone(),
                routing_reason: "explicit_tenant_assignment",
                load_balance_weight: 1.0,
            };
        }

        let table_policy = self.tables.get_table_policy(table);
        let shard_key = shard_key_hint.map(|s| s.to_string()).or_else(|| {
            table_policy.shard_by.clone()
        });

        if let Some(key) = shard_key {
            let prefix = hash_prefix(&key);
            if let Some(shard_id) = policy.range_shard(&prefix) {
                return ShardTarget {
                    shard_id: shard_id.clone(),
                    routing_reason: "hash_range",
                    load_balance_weight: 1.0,
                };
            }
        }

        let shards: Vec<_> = policy.known_shards().into_iter().collect();
        let key = format!("{tenant_id}:{table}");
        let idx = stable_index(&key, shards.len().max(1));
        let shard_id = shards.get(idx).cloned().unwrap_or_else(|| "shard-0".to_string());
        ShardTarget {
            shard_id,
            routing_reason: "stable_hash",
            load_balance_weight: 1.0,
        }
    }

    /// Shard to read from for `tenant_id`, honoring an active split.
    pub fn resolve_read_shard(&self, tenant_id: &str, primary: &ShardId) -> ShardId {
        match self.split_state.get(tenant_id) {
            Some(info) if matches!(info.phase, Phase::Completed | Phase::CutoverPending) => {
                info.target_shard
            }
            Some(info) if info.active => info.source_shard,
            _ => primary.clone(),
        }
    }

    /// Shards to write to for `tenant_id`, honoring an active split.
    pub fn resolve_write_shards(&self, tenant_id: &str, primary: &ShardId) -> Vec<ShardId> {
        match self.split_state.get(tenant_id) {
            Some(info)
                if matches!(
                    info.phase,
                    Phase::DualWrite | Phase::Backfill | Phase::Tailing | Phase::CutoverPending
                ) =>
            {
                vec![info.source_shard, info.target_shard]
            }
            Some(info) if info.phase == Phase::Completed => vec![info.target_shard],
            _ => vec![primary.clone()],
        }
    }

    pub fn record_health(&self, shard_id: &str, health: ShardHealth) {
        self.health.insert(shard_id.to_string(), health);
    }

    pub fn health_of(&self, shard_id: &str) -> ShardHealth {
        self.health.get(shard_id).map(|h| h.clone()).unwrap_or_default()
    }

    /// Among healthy shards under 80% utilization, the least loaded.
    pub fn find_optimal_shard(&self, candidates: &[ShardId]) -> Option<ShardId> {
        candidates
            .iter()
            .filter_map(|id| {
                let health = self.health_of(id);
                (health.status == HealthStatus::Healthy && health.capacity_utilization < 0.8)
                    .then_some((id.clone(), health.capacity_utilization))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id)
    }

    /// Best-effort rebalance report; actual tenant movement is delegated
    /// to C8 (spec §4.5).
    pub fn rebalance(&self) -> RebalanceResult {
        RebalanceResult::default()
    }

    /// Background health-sampling loop (spec §4.5: >= 30s cadence). Probes
    /// each shard's engine directly rather than the request path, so a
    /// saturated shard is visible before the next query hits it.
    pub async fn run_health_sampler(self: Arc<Self>, storage: Arc<ShardRegistry>, shard_ids: Vec<ShardId>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for shard_id in &shard_ids {
                let Ok(engine) = storage.get_or_create(shard_id) else {
                    continue;
                };
                let health = engine.health();
                let metrics = engine.metrics();
                let capacity_utilization = if metrics.max_bytes > 0 {
                    metrics.current_size_bytes as f64 / metrics.max_bytes as f64
                } else {
                    0.0
                };
                let status = if !health.ok {
                    HealthStatus::Unhealthy
                } else if capacity_utilization >= 0.95 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                self.record_health(
                    shard_id,
                    ShardHealth {
                        status,
                        capacity_utilization,
                        active_connections: metrics.open_transactions as u32,
                        // Not tracked by the embedded engine; request
                        // latency/error counters live in the circuit
                        // breaker, not here.
                        avg_response_time_ms: 0.0,
                        error_rate: 0.0,
                        last_check: chrono::Utc::now(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheDefaults;

    fn router() -> Router {
        let routing = Arc::new(RoutingPolicyStore::bootstrap(4));
        let tables = Arc::new(TablePolicyStore::new(CacheDefaults::default()));
        Router::new(routing, tables)
    }

    #[test]
    fn explicit_tenant_assignment_wins() {
        let r = router();
        let mut policy = r.routing.get_current_policy();
        policy.tenants.insert("acme".into(), "shard-2".into());
        r.routing.update_current_policy(policy, None).unwrap();

        let target = r.route_query("acme", "users", None);
        assert_eq!(target.shard_id, "shard-2");
        assert_eq!(target.routing_reason, "explicit_tenant_assignment");
    }

    #[test]
    fn routing_is_deterministic_until_policy_changes() {
        let r = router();
        let a = r.route_query("unassigned", "orders", None);
        let b = r.route_query("unassigned", "orders", None);
        assert_eq!(a.shard_id, b.shard_id);
    }

    #[test]
    fn dual_write_targets_source_and_target_during_backfill() {
        let r = router();
        r.split_state.set(
            "acme",
            RoutingInfo {
                active: true,
                source_shard: "shard-A".into(),
                target_shard: "shard-B".into(),
                phase: Phase::Backfill,
            },
        );
        let writes = r.resolve_write_shards("acme", &"shard-A".to_string());
        assert_eq!(writes, vec!["shard-A".to_string(), "shard-B".to_string()]);
        let reads = r.resolve_read_shard("acme", &"shard-A".to_string());
        assert_eq!(reads, "shard-A");
    }

    #[test]
    fn completed_split_reads_and_writes_from_target_only() {
        let r = router();
        r.split_state.set(
            "acme",
            RoutingInfo {
                active: true,
                source_shard: "shard-A".into(),
                target_shard: "shard-B".into(),
                phase: Phase::Completed,
            },
        );
        assert_eq!(r.resolve_read_shard("acme", &"shard-A".to_string()), "shard-B");
        assert_eq!(r.resolve_write_shards("acme", &"shard-A".to_string()), vec!["shard-B".to_string()]);
    }
}
