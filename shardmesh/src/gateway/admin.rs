//! Admin surface: policy updates and split-phase transitions.
//!
//! Mirrors the teacher's `admin::Command` + `Parser` shape (one struct per
//! command, a flat dispatch enum, a router keyed on request path) but
//! reached over HTTP instead of the admin wire protocol.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::{RoutingPolicy, RoutingPolicyStore, TablePolicy, TablePolicyStore};
use crate::split::{Orchestrator, PlanMetrics, ShardSplitPlan};

/// Every admin command implements this; `execute` is the only thing the
/// HTTP layer calls.
#[async_trait::async_trait]
pub trait Command {
    type Output: Serialize;
    async fn execute(&self) -> Result<Self::Output>;
}

pub struct UpdateRoutingPolicy {
    pub store: Arc<RoutingPolicyStore>,
    pub policy: RoutingPolicy,
    pub description: Option<String>,
}

#[async_trait::async_trait]
impl Command for UpdateRoutingPolicy {
    type Output = u64;
    async fn execute(&self) -> Result<u64> {
        self.store.update_current_policy(self.policy.clone(), self.description.clone())
    }
}

pub struct UpdateTablePolicy {
    pub store: Arc<TablePolicyStore>,
    pub table: String,
    pub policy: TablePolicy,
}

#[async_trait::async_trait]
impl Command for UpdateTablePolicy {
    type Output = ();
    async fn execute(&self) -> Result<()> {
        self.store.update_table_policy(&self.table, self.policy.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct PlanSplitRequest {
    pub source_shard: String,
    pub target_shard: String,
    pub tenant_ids: Vec<String>,
    pub description: Option<String>,
}

pub struct PlanSplit {
    pub orchestrator: Arc<Orchestrator>,
    pub request: PlanSplitRequest,
}

#[async_trait::async_trait]
impl Command for PlanSplit {
    type Output = SplitIdResponse;
    async fn execute(&self) -> Result<SplitIdResponse> {
        let id = self.orchestrator.plan_split(
            self.request.source_shard.clone(),
            self.request.target_shard.clone(),
            self.request.tenant_ids.clone(),
            self.request.description.clone(),
        )?;
        Ok(SplitIdResponse { id })
    }
}

#[derive(Debug, Serialize)]
pub struct SplitIdResponse {
    pub id: String,
}

/// The `:id/{action}` verbs from spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitAction {
    StartDualWrite,
    RunBackfill,
    ReplayTail,
    Cutover,
    Rollback,
}

impl SplitAction {
    pub fn parse(segment: &str) -> Result<Self> {
        match segment {
            "startDualWrite" => Ok(Self::StartDualWrite),
            "runBackfill" => Ok(Self::RunBackfill),
            "replayTail" => Ok(Self::ReplayTail),
            "cutover" => Ok(Self::Cutover),
            "rollback" => Ok(Self::Rollback),
            other => Err(Error::InvalidQuery(format!("unknown split action: {other}"))),
        }
    }
}

pub struct DriveSplit {
    pub orchestrator: Arc<Orchestrator>,
    pub plan_id: String,
    pub action: SplitAction,
    pub backfill_page_size: usize,
    pub tail_replay_limit: usize,
}

#[derive(Debug, Serialize)]
pub struct SplitActionResponse {
    pub plan: ShardSplitPlan,
}

#[async_trait::async_trait]
impl Command for DriveSplit {
    type Output = SplitActionResponse;

    async fn execute(&self) -> Result<SplitActionResponse> {
        match self.action {
            SplitAction::StartDualWrite => self.orchestrator.start_dual_write(&self.plan_id)?,
            SplitAction::RunBackfill => {
                self.orchestrator.run_backfill(&self.plan_id, self.backfill_page_size).await?
            }
            SplitAction::ReplayTail => {
                self.orchestrator.replay_tail(&self.plan_id, self.tail_replay_limit).await?
            }
            SplitAction::Cutover => {
                self.orchestrator.cutover(&self.plan_id)?;
            }
            SplitAction::Rollback => self.orchestrator.rollback(&self.plan_id)?,
        }
        Ok(SplitActionResponse {
            plan: self.orchestrator.get_plan(&self.plan_id)?,
        })
    }
}

pub struct ListSplits {
    pub orchestrator: Arc<Orchestrator>,
}

#[async_trait::async_trait]
impl Command for ListSplits {
    type Output = Vec<PlanMetrics>;
    async fn execute(&self) -> Result<Vec<PlanMetrics>> {
        Ok(self
            .orchestrator
            .list_plans()
            .iter()
            .map(PlanMetrics::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheDefaults;
    use crate::router::Router;
    use crate::storage::ShardRegistry;

    #[test]
    fn parses_known_split_actions() {
        assert_eq!(SplitAction::parse("cutover").unwrap(), SplitAction::Cutover);
        assert!(SplitAction::parse("nonsense").is_err());
    }

    #[tokio::test]
    async fn plan_split_command_creates_a_plan() {
        let routing = Arc::new(RoutingPolicyStore::bootstrap(2));
        let tables = Arc::new(TablePolicyStore::new(CacheDefaults::default()));
        let storage = Arc::new(ShardRegistry::in_memory(1024 * 1024 * 1024));
        let router = Arc::new(Router::new(routing.clone(), tables.clone()));
        let orchestrator = Arc::new(Orchestrator::new(routing.clone(), tables, storage, router));

        let mut policy = routing.get_current_policy();
        policy.tenants.insert("acme".into(), "shard-0".into());
        routing.update_current_policy(policy, None).unwrap();

        let cmd = PlanSplit {
            orchestrator,
            request: PlanSplitRequest {
                source_shard: "shard-0".into(),
                target_shard: "shard-1".into(),
                tenant_ids: vec!["acme".into()],
                description: None,
            },
        };
        let response = cmd.execute().await.unwrap();
        assert!(!response.id.is_empty());
    }
}
