//! Transaction pinning (spec §4.7.5): `sessionId -> {tenantId, shardId,
//! transactionId?, isInTransaction, lastSeen}`, with a background sweep
//! that evicts idle, non-transactional sessions.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub tenant_id: String,
    pub shard_id: String,
    pub transaction_id: Option<String>,
    pub is_in_transaction: bool,
    pub last_seen: Instant,
}

/// Sticky-session map. Mutate-check-replace happens inside a short
/// critical section per spec §5 ("no step holds a lock across I/O except
/// the sticky-session mapping").
pub struct SessionTable {
    sessions: DashMap<String, SessionState>,
    idle_ttl: Duration,
}

impl SessionTable {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_ttl,
        }
    }

    pub fn begin(&self, tenant_id: &str, shard_id: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            SessionState {
                tenant_id: tenant_id.to_string(),
                shard_id: shard_id.to_string(),
                transaction_id: None,
                is_in_transaction: false,
                last_seen: Instant::now(),
            },
        );
        session_id
    }

    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(mut s) = self.sessions.get_mut(session_id) {
            s.last_seen = Instant::now();
        }
    }

    /// Pin a transaction to its shard. All subsequent statements on this
    /// session MUST route to the same shard until commit/rollback.
    pub fn open_transaction(&self, session_id: &str, transaction_id: &str) {
        if let Some(mut s) = self.sessions.get_mut(session_id) {
            s.transaction_id = Some(transaction_id.to_string());
            s.is_in_transaction = true;
            s.last_seen = Instant::now();
        }
    }

    pub fn close_transaction(&self, session_id: &str) {
        if let Some(mut s) = self.sessions.get_mut(session_id) {
            s.transaction_id = None;
            s.is_in_transaction = false;
            s.last_seen = Instant::now();
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Clears the transaction pin on any session holding one of
    /// `transaction_ids`. Called after `ShardEngine::expire_transactions`
    /// auto-rolls-back those transactions, so the now-unpinned session is
    /// reaped by the next `sweep()` instead of holding its shard forever.
    pub fn close_transactions_by_id(&self, transaction_ids: &[String]) {
        if transaction_ids.is_empty() {
            return;
        }
        for mut entry in self.sessions.iter_mut() {
            if entry.transaction_id.as_deref().is_some_and(|id| transaction_ids.iter().any(|t| t == id)) {
                entry.transaction_id = None;
                entry.is_in_transaction = false;
            }
        }
    }

    /// Evict idle sessions past TTL, unless they are pinned to an open
    /// transaction (those are unpinned by `close_transactions_by_id` once
    /// their transaction expires, then reaped here on the next tick).
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| !e.is_in_transaction && now.duration_since(e.last_seen) > self.idle_ttl)
            .map(|e| e.key().clone())
            .collect();
        for id in &stale {
            self.sessions.remove(id);
        }
        stale.len()
    }

    pub async fn run_sweeper(self: std::sync::Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = self.sweep();
            if evicted > 0 {
                tracing::debug!(evicted, "swept idle sessions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_creates_a_non_transactional_session() {
        let table = SessionTable::new(Duration::from_secs(300));
        let id = table.begin("acme", "shard-0");
        let state = table.get(&id).unwrap();
        assert!(!state.is_in_transaction);
        assert_eq!(state.shard_id, "shard-0");
    }

    #[test]
    fn open_transaction_pins_shard_until_close() {
        let table = SessionTable::new(Duration::from_secs(300));
        let id = table.begin("acme", "shard-0");
        table.open_transaction(&id, "txn-1");
        assert!(table.get(&id).unwrap().is_in_transaction);
        table.close_transaction(&id);
        assert!(!table.get(&id).unwrap().is_in_transaction);
    }

    #[test]
    fn close_transactions_by_id_unpins_then_sweep_reaps() {
        let table = SessionTable::new(Duration::from_millis(1));
        let pinned = table.begin("acme", "shard-1");
        table.open_transaction(&pinned, "txn-1");
        table.close_transactions_by_id(&["txn-1".to_string()]);
        assert!(!table.get(&pinned).unwrap().is_in_transaction);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.sweep(), 1);
    }

    #[test]
    fn sweep_evicts_idle_non_transactional_sessions_only() {
        let table = SessionTable::new(Duration::from_millis(1));
        let idle = table.begin("acme", "shard-0");
        let pinned = table.begin("acme", "shard-1");
        table.open_transaction(&pinned, "txn-1");
        std::thread::sleep(Duration::from_millis(5));
        let evicted = table.sweep();
        assert_eq!(evicted, 1);
        assert!(table.get(&idle).is_none());
        assert!(table.get(&pinned).is_some());
    }
}
