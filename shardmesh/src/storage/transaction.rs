//! Transaction bookkeeping for a single shard (spec §3 `Transaction`).

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct QueuedOp {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub tenant_id: String,
    pub queued_ops: Vec<QueuedOp>,
    pub start_time: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub state: TxnState,
}

impl Transaction {
    pub fn new(id: String, tenant_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            queued_ops: Vec::new(),
            start_time: now,
            last_active_at: now,
            state: TxnState::Open,
        }
    }

    pub fn push(&mut self, sql: String, params: Vec<Value>) {
        self.queued_ops.push(QueuedOp { sql, params });
        self.last_active_at = Utc::now();
    }

    pub fn inactive_for(&self) -> chrono::Duration {
        Utc::now() - self.last_active_at
    }
}
