//! Shard split plan: the persisted state C8 drives through its phases.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{ShardId, TablePolicy, TenantId};
use crate::router::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillState {
    pub status: BackfillStatus,
    /// `"<tenantId>:<table>"` -> last copied rowid cursor.
    pub table_cursor: BTreeMap<String, i64>,
    pub total_rows_copied: u64,
}

impl Default for BackfillState {
    fn default() -> Self {
        Self {
            status: BackfillStatus::Pending,
            table_cursor: BTreeMap::new(),
            total_rows_copied: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailStatus {
    Pending,
    Replaying,
    CaughtUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailState {
    pub status: TailStatus,
    pub last_event_id: i64,
    pub last_event_ts: Option<DateTime<Utc>>,
}

impl Default for TailState {
    fn default() -> Self {
        Self {
            status: TailStatus::Pending,
            last_event_id: 0,
            last_event_ts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSplitPlan {
    pub id: String,
    pub source_shard: ShardId,
    pub target_shard: ShardId,
    pub tenant_ids: Vec<TenantId>,
    pub table_policies: BTreeMap<String, TablePolicy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: Phase,
    pub routing_version_at_start: u64,
    pub dual_write_started_at: Option<DateTime<Utc>>,
    pub backfill: BackfillState,
    pub tail: TailState,
    pub routing_version_cutover: Option<u64>,
    pub error_message: Option<String>,
}

impl ShardSplitPlan {
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.touch();
    }
}

#[derive(Debug, Serialize)]
pub struct PlanMetrics {
    pub phase: Phase,
    pub total_rows_copied: u64,
    pub backfill_status: BackfillStatus,
    pub tail_status: TailStatus,
    pub tenants: Vec<TenantId>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ShardSplitPlan> for PlanMetrics {
    fn from(plan: &ShardSplitPlan) -> Self {
        Self {
            phase: plan.phase,
            total_rows_copied: plan.backfill.total_rows_copied,
            backfill_status: plan.backfill.status,
            tail_status: plan.tail.status,
            tenants: plan.tenant_ids.clone(),
            started_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}
