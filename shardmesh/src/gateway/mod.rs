//! C7: Gateway.
//!
//! Owns every request-facing concern from spec §4.7: authentication,
//! validation, hint parsing, consistency dispatch, transaction pinning,
//! per-shard pool admission, circuit breaking, and secondary-path
//! invalidation. Grounded on the teacher's `stats/http_server.rs` service
//! shape and `admin/mod.rs` Command dispatch, generalized from a single
//! Postgres backend per pool to one-of-N shard backends per tenant.

pub mod admin;
pub mod auth;
pub mod circuit_breaker;
pub mod http;
pub mod pool;
pub mod session;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{self, CacheEngine, ReadMode};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::eventbus::{EventBus, EventType};
use crate::policy::{RoutingPolicyStore, TablePolicy, TablePolicyStore};
use crate::router::Router;
use crate::split::Orchestrator;
use crate::storage::{MutationResult, QueryMetadata, ShardRegistry};

use auth::{AuthContext, Authenticator, SharedSecretAuthenticator};
use circuit_breaker::CircuitBreaker;
use pool::ShardPool;
use session::SessionTable;
use validation::{parse_hints, validate_sql, QueryHint};

fn default_params() -> Value {
    Value::Array(Vec::new())
}

#[derive(Debug, Deserialize)]
pub struct SqlRequest {
    pub sql: String,
    /// A positional JSON array, or a `{name: value}` object matched against
    /// `:name` placeholders in `sql` (see [`validation::bind_params`]).
    #[serde(default = "default_params")]
    pub params: Value,
    /// A bare query-hint comment (e.g. `"/*+ strong */"`) accepted as a
    /// structured alternative to embedding it in `sql` directly.
    #[serde(default)]
    pub hints: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct SqlResponse {
    #[serde(default)]
    pub rows: Vec<serde_json::Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<i64>,
    pub metadata: QueryMetadata,
}

#[derive(Debug, Deserialize)]
pub struct BatchOperation {
    pub sql: String,
    #[serde(default = "default_params")]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct SqlBatchRequest {
    pub operations: Vec<BatchOperation>,
}

#[derive(Debug, Serialize)]
pub struct SqlBatchResponse {
    pub results: Vec<MutationResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxnWireOp {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Deserialize)]
pub struct TxnRequest {
    pub op: TxnWireOp,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Hints at which shard a fresh `BEGIN` should pin to, e.g. a tenant's
    /// shard key value for a table without an explicit routing entry.
    #[serde(default)]
    pub shard_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TxnResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Every collaborator a request touches, wired together once at startup.
pub struct Gateway {
    pub routing: Arc<RoutingPolicyStore>,
    pub tables: Arc<TablePolicyStore>,
    pub storage: Arc<ShardRegistry>,
    pub router: Arc<Router>,
    pub cache: Arc<CacheEngine>,
    pub event_bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionTable>,
    pool: Arc<ShardPool>,
    breaker: Arc<CircuitBreaker>,
    authenticator: Arc<dyn Authenticator>,
    shard_call_deadline: Duration,
    transaction_idle: chrono::Duration,
    pub split_backfill_page_size: usize,
    pub split_tail_replay_limit: usize,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routing: Arc<RoutingPolicyStore>,
        tables: Arc<TablePolicyStore>,
        storage: Arc<ShardRegistry>,
        router: Arc<Router>,
        cache: Arc<CacheEngine>,
        event_bus: Arc<EventBus>,
        orchestrator: Arc<Orchestrator>,
        config: &Config,
    ) -> Self {
        Self {
            routing,
            tables,
            storage,
            router,
            cache,
            event_bus,
            orchestrator,
            sessions: Arc::new(SessionTable::new(Duration::from_millis(config.general.session_idle_ttl_ms))),
            pool: Arc::new(ShardPool::new(config.general.max_connections_per_shard)),
            breaker: Arc::new(CircuitBreaker::new(
                config.general.breaker_failure_threshold,
                Duration::from_millis(config.general.breaker_cooldown_ms),
            )),
            authenticator: Arc::new(SharedSecretAuthenticator::new(config.general.jwt_secret.clone())),
            shard_call_deadline: Duration::from_millis(5_000),
            transaction_idle: chrono::Duration::milliseconds(config.general.transaction_idle_ms as i64),
            split_backfill_page_size: config.sharding.backfill_page_size,
            split_tail_replay_limit: config.sharding.tail_replay_limit,
        }
    }

    /// Builds every C1-C6/C8 collaborator from `config` and returns a
    /// ready-to-serve Gateway plus the event bus's raw receiver, which the
    /// caller spawns `EventBus::run` over.
    pub fn bootstrap(config: &Config) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<crate::eventbus::BusMessage>) {
        let routing = Arc::new(RoutingPolicyStore::bootstrap(config.sharding.shard_count));
        let tables = Arc::new(TablePolicyStore::new(config.cache.clone()));
        let storage = Arc::new(ShardRegistry::new(
            config.sharding.data_dir.clone().into(),
            config.sharding.max_shard_size_bytes,
        ));
        let router = Arc::new(Router::new(routing.clone(), tables.clone()));
        let cache = Arc::new(CacheEngine::new(config.cache.clone()));
        let (event_bus, receiver) = EventBus::new(Duration::from_millis(config.cache.processed_marker_ttl_ms));
        storage.set_event_bus(event_bus.clone());
        let orchestrator = Arc::new(Orchestrator::new(routing.clone(), tables.clone(), storage.clone(), router.clone()));
        let gateway = Arc::new(Self::new(routing, tables, storage, router, cache, event_bus, orchestrator, config));
        (gateway, receiver)
    }

    pub fn authenticate(&self, bearer_token: Option<&str>) -> Result<AuthContext> {
        self.authenticator.authenticate(bearer_token)
    }

    fn cache_mode_and_window(&self, table: &str, sql: &str, hint: Option<QueryHint>) -> (ReadMode, u64, u64) {
        let policy = self.tables.get_table_policy(table);
        if validation::touches_any_column(sql, &policy.cache.always_strong_columns) {
            return (ReadMode::Strong, policy.cache.ttl_ms, policy.cache.swr_ms);
        }
        match hint {
            Some(QueryHint::Strong) => (ReadMode::Strong, policy.cache.ttl_ms, policy.cache.swr_ms),
            Some(QueryHint::Weak) => (ReadMode::Cached, policy.cache.ttl_ms, policy.cache.swr_ms),
            Some(QueryHint::Bounded(ms)) => (ReadMode::Bounded, ms, policy.cache.swr_ms.max(ms + 1)),
            None => {
                let mode = match policy.cache.mode {
                    crate::policy::CacheMode::Strong => ReadMode::Strong,
                    crate::policy::CacheMode::Bounded => ReadMode::Bounded,
                    crate::policy::CacheMode::Cached => ReadMode::Cached,
                };
                (mode, policy.cache.ttl_ms, policy.cache.swr_ms)
            }
        }
    }

    async fn dispatch_to_shard<T, F, Fut>(&self, shard_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<crate::storage::ShardEngine>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.breaker.check(shard_id)?;
        let _permit = self.pool.acquire(shard_id, self.shard_call_deadline).await?;
        let engine = self.storage.get_or_create(shard_id)?;
        match f(engine).await {
            Ok(value) => {
                self.breaker.record_success(shard_id);
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure(shard_id);
                Err(err)
            }
        }
    }

    /// Defense-in-depth invalidation path (spec §4.7.7): idempotent thanks
    /// to the event bus's dedup, so double-publishing with C3's own
    /// producer path is harmless.
    fn publish_secondary_invalidation(&self, shard_id: &str, tenant_id: &str, table: &str) {
        self.event_bus
            .publish(shard_id, EventType::Invalidate, vec![format!("{tenant_id}:{table}")]);
    }

    fn is_select(sql: &str) -> bool {
        sql.trim_start().get(..6).map(|s| s.eq_ignore_ascii_case("select")).unwrap_or(false)
    }

    fn is_ddl(sql: &str) -> bool {
        let trimmed = sql.trim_start();
        ["create ", "alter ", "drop "]
            .iter()
            .any(|kw| trimmed.len() >= kw.len() && trimmed[..kw.len()].eq_ignore_ascii_case(kw))
    }

    /// `POST /sql`.
    pub async fn execute_sql(
        &self,
        auth: &AuthContext,
        req: SqlRequest,
        session_id: Option<&str>,
    ) -> Result<SqlResponse> {
        let raw_sql = match &req.hints {
            Some(hint) => format!("{hint} {}", req.sql),
            None => req.sql.clone(),
        };
        validate_sql(&raw_sql)?;
        let (sql, hints) = parse_hints(&raw_sql);
        let (sql, params) = validation::bind_params(&sql, &req.params)?;
        let table = validation::extract_table(&sql).unwrap_or_else(|| "*".to_string());
        let tenant_id = auth.tenant_id.clone();

        let pinned = session_id.and_then(|id| self.sessions.get(id)).filter(|s| s.is_in_transaction);

        if Self::is_select(&sql) {
            let shard_id = match &pinned {
                Some(state) => state.shard_id.clone(),
                None => {
                    let shard_key_hint = hints.shard_key.as_ref().map(|(_, v)| v.as_str());
                    let target = self.router.route_query(&tenant_id, &table, shard_key_hint);
                    self.router.resolve_read_shard(&tenant_id, &target.shard_id)
                }
            };
            let (mode, ttl_ms, swr_ms) = self.cache_mode_and_window(&table, &sql, hints.consistency);
            let key = cache::query_key(&tenant_id, &table, &sql, &params);

            let cache = self.cache.clone();
            let storage = self.storage.clone();
            let fetch_sql = sql.clone();
            let fetch_params = params.clone();
            let pool = self.pool.clone();
            let breaker = self.breaker.clone();
            let deadline = self.shard_call_deadline;
            let fetch_shard_id = shard_id.clone();

            let data = cache::CacheEngine::read(&cache, mode, &key, &shard_id, ttl_ms, swr_ms, move || {
                let storage = storage.clone();
                let pool = pool.clone();
                let breaker = breaker.clone();
                let shard_id = fetch_shard_id.clone();
                let sql = fetch_sql.clone();
                let params = fetch_params.clone();
                async move {
                    breaker.check(&shard_id)?;
                    let _permit = pool.acquire(&shard_id, deadline).await?;
                    let engine = storage.get_or_create(&shard_id)?;
                    match engine.query(&sql, &params) {
                        Ok(result) => {
                            breaker.record_success(&shard_id);
                            Ok(serde_json::to_value(result.rows).unwrap_or(Value::Null))
                        }
                        Err(err) => {
                            breaker.record_failure(&shard_id);
                            Err(Error::from(err))
                        }
                    }
                }
            })
            .await?;

            let rows: Vec<serde_json::Map<String, Value>> = match data {
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect(),
                _ => Vec::new(),
            };
            return Ok(SqlResponse {
                rows,
                rows_affected: None,
                insert_id: None,
                metadata: QueryMetadata {
                    shard_id,
                    execution_time_ms: 0,
                },
            });
        }

        let (shard_id, transaction_id) = match &pinned {
            Some(state) => (state.shard_id.clone(), state.transaction_id.clone()),
            None => {
                let shard_key_hint = hints.shard_key.as_ref().map(|(_, v)| v.as_str());
                let target = self.router.route_query(&tenant_id, &table, shard_key_hint);
                (target.shard_id, None)
            }
        };

        let is_ddl = Self::is_ddl(&sql);
        let tenant_for_op = tenant_id.clone();
        let sql_for_op = sql.clone();
        let result = self
            .dispatch_to_shard(&shard_id, move |engine| async move {
                if is_ddl {
                    Ok(engine.ddl(&tenant_for_op, &sql_for_op, &params)?)
                } else {
                    Ok(engine.mutation(&tenant_for_op, &sql_for_op, &params, transaction_id.as_deref())?)
                }
            })
            .await?;

        self.publish_secondary_invalidation(&shard_id, &tenant_id, &table);
        if let Some(id) = session_id {
            self.sessions.touch(id);
        }

        Ok(SqlResponse {
            rows: Vec::new(),
            rows_affected: Some(result.rows_affected),
            insert_id: result.insert_id,
            metadata: result.metadata,
        })
    }

    /// `POST /sql/batch`: groups operations by resolved shard and commits
    /// each shard's group atomically, preserving the caller's ordering in
    /// the flattened response.
    pub async fn execute_batch(&self, auth: &AuthContext, req: SqlBatchRequest) -> Result<SqlBatchResponse> {
        let tenant_id = auth.tenant_id.clone();
        let mut groups: indexmap::IndexMap<String, Vec<(usize, String, Vec<Value>)>> = indexmap::IndexMap::new();

        for (idx, op) in req.operations.iter().enumerate() {
            validate_sql(&op.sql)?;
            let (sql, hints) = parse_hints(&op.sql);
            let (sql, params) = validation::bind_params(&sql, &op.params)?;
            let table = validation::extract_table(&sql).unwrap_or_else(|| "*".to_string());
            let shard_key_hint = hints.shard_key.as_ref().map(|(_, v)| v.as_str());
            let target = self.router.route_query(&tenant_id, &table, shard_key_hint);
            groups
                .entry(target.shard_id)
                .or_default()
                .push((idx, sql, params));
        }

        let mut results: Vec<Option<MutationResult>> = (0..req.operations.len()).map(|_| None).collect();
        let mut touched_tables: Vec<(String, String)> = Vec::new();

        for (shard_id, ops) in groups {
            let tables_for_shard: Vec<String> = ops
                .iter()
                .map(|(_, sql, _)| validation::extract_table(sql).unwrap_or_else(|| "*".to_string()))
                .collect();
            let operations: Vec<(String, Vec<Value>)> =
                ops.iter().map(|(_, sql, params)| (sql.clone(), params.clone())).collect();
            let tenant_for_op = tenant_id.clone();
            let shard_results = self
                .dispatch_to_shard(&shard_id, move |engine| async move {
                    Ok(engine.mutation_batch(&tenant_for_op, &operations)?)
                })
                .await?;
            for ((idx, _, _), result) in ops.iter().zip(shard_results.into_iter()) {
                results[*idx] = Some(result);
            }
            for table in tables_for_shard {
                touched_tables.push((shard_id.clone(), table));
            }
        }

        for (shard_id, table) in touched_tables {
            self.publish_secondary_invalidation(&shard_id, &tenant_id, &table);
        }

        Ok(SqlBatchResponse {
            results: results.into_iter().flatten().collect(),
        })
    }

    /// `POST /sql/txn`.
    pub async fn execute_txn(&self, auth: &AuthContext, req: TxnRequest) -> Result<TxnResponse> {
        let tenant_id = auth.tenant_id.clone();
        match req.op {
            TxnWireOp::Begin => {
                let target = self.router.route_query(&tenant_id, "*", req.shard_key.as_deref());
                let shard_id = target.shard_id;
                let tenant_for_op = tenant_id.clone();
                let txn_id = self
                    .dispatch_to_shard(&shard_id, move |engine| async move {
                        Ok(engine
                            .transaction(crate::storage::TxnOp::Begin, &tenant_for_op, None)?
                            .ok_or_else(|| Error::Internal("BEGIN did not return a transaction id".into()))?)
                    })
                    .await?;
                let session_id = req.session_id.unwrap_or_else(|| self.sessions.begin(&tenant_id, &shard_id));
                self.sessions.open_transaction(&session_id, &txn_id);
                Ok(TxnResponse {
                    session_id,
                    transaction_id: Some(txn_id),
                })
            }
            TxnWireOp::Commit | TxnWireOp::Rollback => {
                let session_id = req.session_id.ok_or_else(|| Error::TransactionNotFound("missing sessionId".into()))?;
                let state = self
                    .sessions
                    .get(&session_id)
                    .ok_or_else(|| Error::TransactionNotFound(session_id.clone()))?;
                let shard_id = state.shard_id.clone();
                let transaction_id = req.transaction_id.or(state.transaction_id.clone());
                let op = if req.op == TxnWireOp::Commit {
                    crate::storage::TxnOp::Commit
                } else {
                    crate::storage::TxnOp::Rollback
                };
                let tenant_for_op = tenant_id.clone();
                let txn_id_for_op = transaction_id.clone();
                self.dispatch_to_shard(&shard_id, move |engine| async move {
                    engine.transaction(op, &tenant_for_op, txn_id_for_op)?;
                    Ok(())
                })
                .await?;
                self.sessions.close_transaction(&session_id);
                if op == crate::storage::TxnOp::Commit {
                    self.publish_secondary_invalidation(&shard_id, &tenant_id, "*");
                }
                Ok(TxnResponse {
                    session_id,
                    transaction_id,
                })
            }
        }
    }

    pub fn update_routing_policy(&self, policy: crate::policy::RoutingPolicy, description: Option<String>) -> Result<u64> {
        self.routing.update_current_policy(policy, description)
    }

    pub fn update_table_policy(&self, table: &str, policy: TablePolicy) -> Result<()> {
        self.tables.update_table_policy(table, policy)
    }

    /// Auto-rollback transactions idle past `transaction_idle_ms` on every
    /// known shard and unpin the sessions holding them (spec §5).
    pub fn sweep_expired_transactions(&self) -> usize {
        let mut expired_total = 0;
        for shard_id in self.storage.known_shard_ids() {
            let Ok(engine) = self.storage.get_or_create(&shard_id) else {
                continue;
            };
            let expired = engine.expire_transactions(self.transaction_idle);
            if !expired.is_empty() {
                self.sessions.close_transactions_by_id(&expired);
                expired_total += expired.len();
            }
        }
        expired_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn gateway() -> Arc<Gateway> {
        let config = Config::default();
        let (gateway, _receiver) = Gateway::bootstrap(&config);
        gateway
    }

    fn auth_for(tenant_id: &str) -> AuthContext {
        AuthContext {
            tenant_id: tenant_id.to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn ddl_then_mutation_then_select_round_trips() {
        let gateway = gateway();
        let auth = auth_for("acme");

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "CREATE TABLE accounts (id INTEGER PRIMARY KEY, tenant_id TEXT, balance INTEGER)".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "INSERT INTO accounts (id, tenant_id, balance) VALUES (?1, ?2, ?3)".into(),
                    params: Value::Array(vec![Value::from(1), Value::from("acme"), Value::from(500)]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        let response = gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "/*+ strong */ SELECT balance FROM accounts WHERE id = ?1".into(),
                    params: Value::Array(vec![Value::from(1)]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.rows[0]["balance"], Value::from(500));
    }

    #[tokio::test]
    async fn transaction_pins_statements_to_one_shard() {
        let gateway = gateway();
        let auth = auth_for("acme");

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        let begin = gateway
            .execute_txn(
                &auth,
                TxnRequest {
                    op: TxnWireOp::Begin,
                    session_id: None,
                    transaction_id: None,
                    shard_key: None,
                },
            )
            .await
            .unwrap();

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "INSERT INTO accounts (id, balance) VALUES (1, 10)".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                Some(&begin.session_id),
            )
            .await
            .unwrap();

        gateway
            .execute_txn(
                &auth,
                TxnRequest {
                    op: TxnWireOp::Commit,
                    session_id: Some(begin.session_id.clone()),
                    transaction_id: begin.transaction_id.clone(),
                    shard_key: None,
                },
            )
            .await
            .unwrap();

        let response = gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "/*+ strong */ SELECT balance FROM accounts WHERE id = 1".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.rows[0]["balance"], Value::from(10));
    }

    #[tokio::test]
    async fn named_placeholders_bind_by_name() {
        let gateway = gateway();
        let auth = auth_for("acme");

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "INSERT INTO accounts (id, balance) VALUES (:id, :balance)".into(),
                    params: serde_json::json!({"id": 1, "balance": 42}),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        let response = gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "/*+ strong */ SELECT balance FROM accounts WHERE id = :id".into(),
                    params: serde_json::json!({"id": 1}),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.rows[0]["balance"], Value::from(42));
    }

    #[tokio::test]
    async fn always_strong_column_bypasses_cache_even_with_weak_hint() {
        let gateway = gateway();
        let auth = auth_for("acme");

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();
        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "INSERT INTO accounts (id, balance) VALUES (1, 10)".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        let mut policy = gateway.tables.get_table_policy("accounts");
        policy.cache.always_strong_columns.insert("balance".to_string());
        gateway.update_table_policy("accounts", policy).unwrap();

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "/*+ weak */ SELECT balance FROM accounts WHERE id = 1".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "UPDATE accounts SET balance = 99 WHERE id = 1".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();

        let response = gateway
            .execute_sql(
                &auth,
                SqlRequest {
                    sql: "/*+ weak */ SELECT balance FROM accounts WHERE id = 1".into(),
                    params: Value::Array(vec![]),
                    hints: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.rows[0]["balance"], Value::from(99));
    }
}
