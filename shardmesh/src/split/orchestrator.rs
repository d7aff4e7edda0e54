//! C8: Shard Split Orchestrator.
//!
//! Drives a plan through `planning -> dual_write -> backfill -> tailing ->
//! cutover_pending -> completed`, with `rollback` reachable from any
//! non-terminal phase. Long-lived steps (`run_backfill`, `replay_tail`)
//! yield cooperatively between pages so they never starve request
//! handlers, mirroring the teacher's event-loop-scheduled replication
//! workflows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::policy::{RoutingPolicyStore, ShardId, TablePolicyStore, TenantId};
use crate::router::{Phase, Router, RoutingInfo};
use crate::storage::ShardRegistry;

use super::plan::{BackfillState, BackfillStatus, PlanMetrics, ShardSplitPlan, TailState, TailStatus};

pub struct Orchestrator {
    plans: DashMap<String, Arc<parking_lot::RwLock<ShardSplitPlan>>>,
    routing: Arc<RoutingPolicyStore>,
    tables: Arc<TablePolicyStore>,
    storage: Arc<ShardRegistry>,
    router: Arc<Router>,
}

impl Orchestrator {
    pub fn new(
        routing: Arc<RoutingPolicyStore>,
        tables: Arc<TablePolicyStore>,
        storage: Arc<ShardRegistry>,
        router: Arc<Router>,
    ) -> Self {
        Self {
            plans: DashMap::new(),
            routing,
            tables,
            storage,
            router,
        }
    }

    fn plan_handle(&self, id: &str) -> Result<Arc<parking_lot::RwLock<ShardSplitPlan>>> {
        self.plans
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| Error::SplitNotFound(id.to_string()))
    }

    pub fn get_plan(&self, id: &str) -> Result<ShardSplitPlan> {
        Ok(self.plan_handle(id)?.read().clone())
    }

    pub fn metrics(&self, id: &str) -> Result<PlanMetrics> {
        Ok(PlanMetrics::from(&self.get_plan(id)?))
    }

    pub fn list_plans(&self) -> Vec<ShardSplitPlan> {
        self.plans.iter().map(|p| p.read().clone()).collect()
    }

    /// Any tenant with a non-terminal plan already in flight.
    fn has_active_plan_for(&self, tenant_ids: &[TenantId]) -> bool {
        self.plans.iter().any(|p| {
            let plan = p.read();
            !plan.phase.is_terminal() && plan.tenant_ids.iter().any(|t| tenant_ids.contains(t))
        })
    }

    pub fn plan_split(
        &self,
        source_shard: ShardId,
        target_shard: ShardId,
        tenant_ids: Vec<TenantId>,
        _description: Option<String>,
    ) -> Result<String> {
        if source_shard == target_shard {
            return Err(Error::InvalidPhase("source and target shard must differ".into()));
        }
        if self.has_active_plan_for(&tenant_ids) {
            return Err(Error::InvalidPhase(
                "a tenant in this plan already has an active split".into(),
            ));
        }
        let policy = self.routing.get_current_policy();
        for tenant in &tenant_ids {
            if policy.tenants.get(tenant) != Some(&source_shard) {
                // Tenants reached via hash-range routing are allowed too;
                // only explicit assignment mismatches are rejected.
                if policy.tenants.contains_key(tenant) {
                    return Err(Error::InvalidPhase(format!(
                        "tenant {tenant} does not currently route to {source_shard}"
                    )));
                }
            }
        }

        let table_policies: BTreeMap<_, _> = self.tables.get_table_policies().into_iter().collect();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let plan = ShardSplitPlan {
            id: id.clone(),
            source_shard,
            target_shard,
            tenant_ids,
            table_policies,
            created_at: now,
            updated_at: now,
            phase: Phase::Planning,
            routing_version_at_start: self.routing.get_current_version(),
            dual_write_started_at: None,
            backfill: BackfillState::default(),
            tail: TailState::default(),
            routing_version_cutover: None,
            error_message: None,
        };
        self.plans.insert(id.clone(), Arc::new(parking_lot::RwLock::new(plan)));
        tracing::info!(plan_id = %id, "split plan created");
        Ok(id)
    }

    fn publish_routing_info(&self, plan: &ShardSplitPlan) {
        for tenant in &plan.tenant_ids {
            self.router.split_state.set(
                tenant,
                RoutingInfo {
                    active: !plan.phase.is_terminal(),
                    source_shard: plan.source_shard.clone(),
                    target_shard: plan.target_shard.clone(),
                    phase: plan.phase,
                },
            );
        }
    }

    pub fn start_dual_write(&self, id: &str) -> Result<()> {
        let handle = self.plan_handle(id)?;
        let source_shard = {
            let plan = handle.read();
            if plan.phase != Phase::Planning {
                return Err(Error::InvalidPhase(format!(
                    "cannot start dual_write from phase {:?}",
                    plan.phase
                )));
            }
            plan.source_shard.clone()
        };
        // Seed the tail cursor at the source's current event offset so
        // `replay_tail` only ever sees events written after dual-write
        // began, not the history `run_backfill` already copies.
        let bookmark = self.storage.get_or_create(&source_shard)?.bookmark(None)?;

        let mut plan = handle.write();
        plan.phase = Phase::DualWrite;
        plan.dual_write_started_at = Some(Utc::now());
        plan.tail.last_event_id = bookmark.event_id;
        plan.touch();
        self.publish_routing_info(&plan);
        tracing::info!(plan_id = %id, "dual write started");
        Ok(())
    }

    /// Copy one page per `(tenant, table)` pair that has a `shardBy`
    /// column, persisting the cursor after every page so a restart resumes
    /// without double-counting rows.
    pub async fn run_backfill(&self, id: &str, page_size: usize) -> Result<()> {
        {
            let handle = self.plan_handle(id)?;
            let mut plan = handle.write();
            if !matches!(plan.phase, Phase::DualWrite | Phase::Backfill) {
                return Err(Error::InvalidPhase(format!(
                    "cannot backfill from phase {:?}",
                    plan.phase
                )));
            }
            plan.phase = Phase::Backfill;
            plan.backfill.status = BackfillStatus::Running;
            plan.touch();
        }

        let (tenants, tables, source_shard, target_shard) = {
            let handle = self.plan_handle(id)?;
            let plan = handle.read();
            (
                plan.tenant_ids.clone(),
                plan.table_policies.clone(),
                plan.source_shard.clone(),
                plan.target_shard.clone(),
            )
        };

        let source = self.storage.get_or_create(&source_shard)?;
        let target = self.storage.get_or_create(&target_shard)?;

        for tenant in &tenants {
            for (table, table_policy) in &tables {
                let Some(shard_by) = &table_policy.shard_by else {
                    continue;
                };
                let cursor_key = format!("{tenant}:{table}");
                loop {
                    let handle = self.plan_handle(id)?;
                    let cursor = handle.read().backfill.table_cursor.get(&cursor_key).copied();

                    let (rows, next_cursor) = match source.export(table, shard_by, tenant, cursor, page_size) {
                        Ok(page) => page,
                        Err(e) => {
                            handle.write().set_error(e.to_string());
                            return Err(e.into());
                        }
                    };
                    if rows.is_empty() {
                        break;
                    }
                    let copied = match target.import(table, &table_policy.pk, &rows) {
                        Ok(n) => n,
                        Err(e) => {
                            handle.write().set_error(e.to_string());
                            return Err(e.into());
                        }
                    };

                    {
                        let mut plan = handle.write();
                        plan.backfill.table_cursor.insert(cursor_key.clone(), next_cursor.unwrap_or(0));
                        plan.backfill.total_rows_copied += copied as u64;
                        plan.touch();
                    }

                    if rows.len() < page_size {
                        break;
                    }
                    // Cooperative yield: never monopolize the scheduler.
                    tokio::task::yield_now().await;
                }
            }
        }

        let handle = self.plan_handle(id)?;
        let mut plan = handle.write();
        plan.backfill.status = BackfillStatus::Done;
        plan.phase = Phase::Tailing;
        plan.touch();
        self.publish_routing_info(&plan);
        tracing::info!(plan_id = %id, rows = plan.backfill.total_rows_copied, "backfill complete");
        Ok(())
    }

    /// Replay source-shard `_events` newer than `tail.lastEventId` onto the
    /// target shard, in strictly increasing id order.
    pub async fn replay_tail(&self, id: &str, limit: usize) -> Result<()> {
        {
            let handle = self.plan_handle(id)?;
            let plan = handle.read();
            if !matches!(plan.phase, Phase::Backfill | Phase::Tailing | Phase::CutoverPending) {
                return Err(Error::InvalidPhase(format!(
                    "cannot tail-replay from phase {:?}",
                    plan.phase
                )));
            }
        }

        let (tenants, source_shard, target_shard, after_id) = {
            let handle = self.plan_handle(id)?;
            let mut plan = handle.write();
            plan.tail.status = super::plan::TailStatus::Replaying;
            plan.touch();
            (
                plan.tenant_ids.clone(),
                plan.source_shard.clone(),
                plan.target_shard.clone(),
                plan.tail.last_event_id,
            )
        };

        let source = self.storage.get_or_create(&source_shard)?;
        let target = self.storage.get_or_create(&target_shard)?;

        let events = source.events(after_id, limit).map_err(Error::from)?;
        let returned = events.len();

        for event in events {
            if !tenants.contains(&event.tenant_id) {
                continue;
            }
            let is_select = event
                .sql
                .trim_start()
                .get(0..6)
                .map(|s| s.eq_ignore_ascii_case("select"))
                .unwrap_or(false);
            if is_select {
                continue;
            }
            let result = if event.event_type == "ddl" {
                target.ddl(&event.tenant_id, &event.sql, &event.params)
            } else {
                target.mutation(&event.tenant_id, &event.sql, &event.params, None)
            };
            if let Err(e) = result {
                let handle = self.plan_handle(id)?;
                handle.write().set_error(e.to_string());
                return Err(e.into());
            }

            let handle = self.plan_handle(id)?;
            let mut plan = handle.write();
            plan.tail.last_event_id = plan.tail.last_event_id.max(event.id);
            plan.tail.last_event_ts = Some(event.ts);
            plan.touch();
            drop(plan);
            tokio::task::yield_now().await;
        }

        let handle = self.plan_handle(id)?;
        let mut plan = handle.write();
        if returned < limit {
            plan.tail.status = TailStatus::CaughtUp;
            plan.phase = Phase::CutoverPending;
            tracing::info!(plan_id = %id, "tail replay caught up");
        }
        plan.touch();
        self.publish_routing_info(&plan);
        Ok(())
    }

    /// Atomically reassign every tenant in the plan to the target shard
    /// and bump the routing version.
    pub fn cutover(&self, id: &str) -> Result<u64> {
        let handle = self.plan_handle(id)?;
        let (tenants, target_shard) = {
            let plan = handle.read();
            if plan.phase != Phase::CutoverPending || plan.tail.status != TailStatus::CaughtUp {
                return Err(Error::InvalidPhase(
                    "cutover requires phase=cutover_pending and tail caught up".into(),
                ));
            }
            (plan.tenant_ids.clone(), plan.target_shard.clone())
        };

        let mut policy = self.routing.get_current_policy();
        for tenant in &tenants {
            policy.tenants.insert(tenant.clone(), target_shard.clone());
        }
        let new_version = self.routing.update_current_policy(
            policy,
            Some(format!("cutover for split {id}")),
        )?;

        let mut plan = handle.write();
        plan.routing_version_cutover = Some(new_version);
        plan.phase = Phase::Completed;
        plan.touch();
        self.publish_routing_info(&plan);
        tracing::info!(plan_id = %id, new_version, "split cutover complete");
        Ok(new_version)
    }

    /// Roll the routing policy back to its pre-split version and mark the
    /// plan terminal.
    pub fn rollback(&self, id: &str) -> Result<()> {
        let handle = self.plan_handle(id)?;
        let routing_version_at_start = handle.read().routing_version_at_start;
        self.routing.rollback_to_version(routing_version_at_start)?;

        let mut plan = handle.write();
        plan.backfill = BackfillState::default();
        plan.tail = TailState::default();
        plan.phase = Phase::RolledBack;
        plan.touch();
        self.publish_routing_info(&plan);
        tracing::warn!(plan_id = %id, "split rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheDefaults;
    use crate::policy::{CacheMode, CachePolicy, TablePolicy};

    fn setup() -> (Orchestrator, Arc<ShardRegistry>) {
        let routing = Arc::new(RoutingPolicyStore::bootstrap(1));
        let tables = Arc::new(TablePolicyStore::new(CacheDefaults::default()));
        tables
            .update_table_policy(
                "accounts",
                TablePolicy {
                    pk: "id".into(),
                    shard_by: Some("tenant_id".into()),
                    cache: CachePolicy {
                        mode: CacheMode::Strong,
                        ttl_ms: 0,
                        swr_ms: 0,
                        always_strong_columns: Default::default(),
                    },
                },
            )
            .unwrap();

        let storage = Arc::new(ShardRegistry::in_memory(10 * 1024 * 1024 * 1024));
        let router = Arc::new(Router::new(routing.clone(), tables.clone()));

        let mut policy = routing.get_current_policy();
        policy.tenants.insert("acme".into(), "shard-A".into());
        routing.update_current_policy(policy, None).unwrap();

        let source = storage.get_or_create("shard-A").unwrap();
        source
            .ddl(
                "acme",
                "CREATE TABLE accounts (id INTEGER PRIMARY KEY, tenant_id TEXT, balance INTEGER)",
                &[],
            )
            .unwrap();
        for i in 0..5 {
            source
                .mutation(
                    "acme",
                    "INSERT INTO accounts (id, tenant_id, balance) VALUES (?1, 'acme', ?2)",
                    &[serde_json::Value::from(i), serde_json::Value::from(i * 10)],
                    None,
                )
                .unwrap();
        }
        storage.get_or_create("shard-B").unwrap().ddl(
            "acme",
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, tenant_id TEXT, balance INTEGER)",
            &[],
        ).unwrap();

        (
            Orchestrator::new(routing, tables, storage.clone(), router),
            storage,
        )
    }

    #[tokio::test]
    async fn full_split_lifecycle_moves_tenant_to_target() {
        let (orch, storage) = setup();
        let id = orch
            .plan_split("shard-A".into(), "shard-B".into(), vec!["acme".into()], None)
            .unwrap();

        orch.start_dual_write(&id).unwrap();
        orch.run_backfill(&id, 2).await.unwrap();
        orch.replay_tail(&id, 750).await.unwrap();
        let version = orch.cutover(&id).unwrap();
        assert!(version > 1);

        let target = storage.get_or_create("shard-B").unwrap();
        let result = target.query("SELECT COUNT(*) AS n FROM accounts", &[]).unwrap();
        assert_eq!(result.rows[0]["n"], serde_json::Value::from(5));

        let plan = orch.get_plan(&id).unwrap();
        assert_eq!(plan.phase, crate::router::Phase::Completed);
        assert_eq!(plan.backfill.total_rows_copied, 5);
    }

    #[tokio::test]
    async fn rollback_restores_original_routing_version() {
        let (orch, _storage) = setup();
        let id = orch
            .plan_split("shard-A".into(), "shard-B".into(), vec!["acme".into()], None)
            .unwrap();
        let version_before = orch.routing.get_current_version();
        orch.start_dual_write(&id).unwrap();
        orch.rollback(&id).unwrap();
        assert_eq!(orch.routing.get_current_version(), version_before);
        assert_eq!(orch.get_plan(&id).unwrap().phase, crate::router::Phase::RolledBack);
    }

    #[tokio::test]
    async fn backfill_is_idempotent_on_resumed_cursor() {
        let (orch, _storage) = setup();
        let id = orch
            .plan_split("shard-A".into(), "shard-B".into(), vec!["acme".into()], None)
            .unwrap();
        orch.start_dual_write(&id).unwrap();
        orch.run_backfill(&id, 2).await.unwrap();
        let first_total = orch.get_plan(&id).unwrap().backfill.total_rows_copied;
        // Re-running backfill after it's already caught up copies nothing new.
        let handle = orch.plan_handle(&id).unwrap();
        handle.write().phase = crate::router::Phase::Backfill;
        orch.run_backfill(&id, 2).await.unwrap();
        let second_total = orch.get_plan(&id).unwrap().backfill.total_rows_copied;
        assert_eq!(first_total, second_total);
    }
}
