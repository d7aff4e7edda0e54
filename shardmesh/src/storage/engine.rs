//! C3: embedded, transactional, single-writer SQL store for one shard.
//!
//! Grounded on the teacher's per-shard pool shapes (`backend::pool::Guard`,
//! single-writer serialization) but backed by an embedded `rusqlite`
//! connection instead of a remote PostgreSQL server, per spec §3/§4.3.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection, ToSql};
use serde::Serialize;
use serde_json::Value;

use crate::eventbus::{EventBus, EventType};

use super::error::{Result, StorageError};
use super::transaction::{Transaction, TxnState};

const STATEMENT_CACHE_CAP: usize = 200;
const SIZE_RECHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOp {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Serialize)]
pub struct QueryMetadata {
    pub shard_id: String,
    pub execution_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Map<String, Value>>,
    pub metadata: QueryMetadata,
}

#[derive(Debug, Serialize)]
pub struct MutationResult {
    pub rows_affected: usize,
    pub insert_id: Option<i64>,
    pub metadata: QueryMetadata,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub ts: chrono::DateTime<Utc>,
    pub event_type: String,
    pub tenant_id: String,
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub shard_id: String,
    pub ok: bool,
    pub current_size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct Metrics {
    pub shard_id: String,
    pub current_size_bytes: u64,
    pub max_bytes: u64,
    pub open_transactions: usize,
}

/// An opaque point-in-time handle. For the embedded engine this names an
/// event-log offset: restoring replays nothing further than `event_id`.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Bookmark {
    pub shard_id: String,
    pub event_id: i64,
}

fn to_sql_value(v: &Value) -> Box<dyn ToSql> {
    match v {
        Value::Null => Box::new(Option::<i64>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

fn row_to_json(row: &rusqlite::Row, names: &[String]) -> rusqlite::Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    for (i, name) in names.iter().enumerate() {
        let value: Value = match row.get_ref(i)? {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(n) => Value::from(n),
            rusqlite::types::ValueRef::Real(f) => {
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            }
            rusqlite::types::ValueRef::Text(t) => {
                Value::String(String::from_utf8_lossy(t).into_owned())
            }
            rusqlite::types::ValueRef::Blob(b) => {
                Value::String(base64_encode(b))
            }
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

/// Best-effort table-name extraction from a mutation/DDL statement, used
/// only to build invalidation keys; never for binding or execution.
fn extract_table_name(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    const PATTERNS: &[&str] = &[
        "insert into ",
        "update ",
        "delete from ",
        "create table if not exists ",
        "create table ",
        "alter table ",
        "drop table if exists ",
        "drop table ",
    ];
    for pattern in PATTERNS {
        if let Some(idx) = lower.find(pattern) {
            let rest = sql[idx + pattern.len()..].trim_start();
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '(' || c == ',')
                .unwrap_or(rest.len());
            let name = rest[..end].trim_matches(|c| c == '`' || c == '"').to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn base64_encode(bytes: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(CHARS[(n >> 18 & 0x3f) as usize] as char);
        out.push(CHARS[(n >> 12 & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 { CHARS[(n >> 6 & 0x3f) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { CHARS[(n & 0x3f) as usize] as char } else { '=' });
    }
    out
}

struct SizeCache {
    bytes: AtomicU64,
    checked_at: Mutex<Instant>,
}

/// Single-writer embedded SQL store for one shard (C3).
pub struct ShardEngine {
    pub shard_id: String,
    conn: Arc<Mutex<Connection>>,
    max_bytes: u64,
    size_cache: SizeCache,
    transactions: DashMap<String, Transaction>,
    /// Producer side of C4. `None` until `attach_event_bus` is called, so
    /// a bare engine (as used in isolated unit tests) never needs one.
    event_bus: ArcSwapOption<EventBus>,
    /// Set by `restore`, consumed by the next session that opens against
    /// this engine (spec §4.3).
    pending_restore: Mutex<Option<i64>>,
}

impl ShardEngine {
    pub fn open(shard_id: impl Into<String>, path: &std::path::Path, max_bytes: u64) -> Result<Self> {
        let conn = Connection::open(path).map_err(StorageError::from)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS _events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                type TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                sql TEXT NOT NULL,
                params TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS _meta (k TEXT PRIMARY KEY, v TEXT NOT NULL);",
        )
        .map_err(StorageError::from)?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAP);
        Ok(Self {
            shard_id: shard_id.into(),
            conn: Arc::new(Mutex::new(conn)),
            max_bytes,
            size_cache: SizeCache {
                bytes: AtomicU64::new(0),
                checked_at: Mutex::new(Instant::now() - SIZE_RECHECK_INTERVAL),
            },
            transactions: DashMap::new(),
            event_bus: ArcSwapOption::empty(),
            pending_restore: Mutex::new(None),
        })
    }

    pub fn open_in_memory(shard_id: impl Into<String>, max_bytes: u64) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                type TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                sql TEXT NOT NULL,
                params TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS _meta (k TEXT PRIMARY KEY, v TEXT NOT NULL);",
        )
        .map_err(StorageError::from)?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAP);
        Ok(Self {
            shard_id: shard_id.into(),
            conn: Arc::new(Mutex::new(conn)),
            max_bytes,
            size_cache: SizeCache {
                bytes: AtomicU64::new(0),
                checked_at: Mutex::new(Instant::now() - SIZE_RECHECK_INTERVAL),
            },
            transactions: DashMap::new(),
            event_bus: ArcSwapOption::empty(),
            pending_restore: Mutex::new(None),
        })
    }

    /// Install the event bus this engine publishes invalidations to on
    /// every successful mutation, DDL, or batch commit (spec §4.4).
    pub fn attach_event_bus(&self, bus: Arc<EventBus>) {
        self.event_bus.store(Some(bus));
    }

    fn publish_invalidation(&self, keys: Vec<String>) {
        if let Some(bus) = self.event_bus.load_full() {
            bus.publish(&self.shard_id, EventType::Invalidate, keys);
        }
    }

    /// `currentSizeBytes`, recomputed at most every 60s (spec §3, §4.3).
    pub fn current_size_bytes(&self) -> u64 {
        let mut checked_at = self.size_cache.checked_at.lock();
        if checked_at.elapsed() < SIZE_RECHECK_INTERVAL {
            return self.size_cache.bytes.load(Ordering::Relaxed);
        }
        let conn = self.conn.lock();
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |r| r.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |r| r.get(0))
            .unwrap_or(4096);
        let bytes = (page_count * page_size).max(0) as u64;
        self.size_cache.bytes.store(bytes, Ordering::Relaxed);
        *checked_at = Instant::now();
        bytes
    }

    fn check_capacity(&self) -> Result<()> {
        if self.current_size_bytes() >= self.max_bytes {
            return Err(StorageError::Capacity);
        }
        Ok(())
    }

    fn append_event(
        conn: &Connection,
        event_type: &str,
        tenant_id: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO _events (ts, type, tenant_id, sql, params) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                event_type,
                tenant_id,
                sql,
                serde_json::to_string(params).unwrap_or_default(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(conn.last_insert_rowid())
    }

    /// SELECT. Parameter binding is the only value-passing surface; the
    /// caller MUST NOT interpolate values into `sql`.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql).map_err(StorageError::from)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound: Vec<Box<dyn ToSql>> = params.iter().map(to_sql_value).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let mut rows_iter = stmt.query(params_from_iter(refs)).map_err(StorageError::from)?;
        let mut rows = Vec::new();
        while let Some(row) = rows_iter.next().map_err(StorageError::from)? {
            rows.push(row_to_json(row, &names).map_err(StorageError::from)?);
        }
        Ok(QueryResult {
            rows,
            metadata: QueryMetadata {
                shard_id: self.shard_id.clone(),
                execution_time_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    /// INSERT/UPDATE/DELETE. If `transaction_id` is set, the op is queued
    /// on the open transaction instead of executed; otherwise it runs
    /// immediately and is logged to `_events`.
    pub fn mutation(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[Value],
        transaction_id: Option<&str>,
    ) -> Result<MutationResult> {
        if let Some(txn_id) = transaction_id {
            let mut txn = self
                .transactions
                .get_mut(txn_id)
                .ok_or_else(|| StorageError::TransactionNotFound(txn_id.to_string()))?;
            txn.push(sql.to_string(), params.to_vec());
            return Ok(MutationResult {
                rows_affected: 0,
                insert_id: None,
                metadata: QueryMetadata {
                    shard_id: self.shard_id.clone(),
                    execution_time_ms: 0,
                },
            });
        }

        self.check_capacity()?;
        let start = Instant::now();
        let conn = self.conn.lock();
        let bound: Vec<Box<dyn ToSql>> = params.iter().map(to_sql_value).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows_affected = conn
            .execute(sql, params_from_iter(refs))
            .map_err(StorageError::from)?;
        let insert_id = if rows_affected > 0 {
            Some(conn.last_insert_rowid())
        } else {
            None
        };
        Self::append_event(&conn, "mutation", tenant_id, sql, params)?;
        drop(conn);
        let table = extract_table_name(sql).unwrap_or_else(|| "*".to_string());
        self.publish_invalidation(vec![format!("{tenant_id}:{table}")]);
        Ok(MutationResult {
            rows_affected,
            insert_id,
            metadata: QueryMetadata {
                shard_id: self.shard_id.clone(),
                execution_time_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    /// CREATE/ALTER/DROP.
    pub fn ddl(&self, tenant_id: &str, sql: &str, params: &[Value]) -> Result<MutationResult> {
        let start = Instant::now();
        let conn = self.conn.lock();
        conn.execute_batch(sql).map_err(StorageError::from)?;
        Self::append_event(&conn, "ddl", tenant_id, sql, params)?;
        drop(conn);
        // DDL can change the shape of any table, not just the one it names
        // (renames, FKs, views) so invalidation always wipes the tenant whole.
        self.publish_invalidation(vec![format!("{tenant_id}:*")]);
        Ok(MutationResult {
            rows_affected: 0,
            insert_id: None,
            metadata: QueryMetadata {
                shard_id: self.shard_id.clone(),
                execution_time_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    /// Execute every operation atomically in one storage transaction. On
    /// any failure the whole batch rolls back.
    pub fn mutation_batch(
        &self,
        tenant_id: &str,
        operations: &[(String, Vec<Value>)],
    ) -> Result<Vec<MutationResult>> {
        self.check_capacity()?;
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StorageError::from)?;
        let mut results = Vec::with_capacity(operations.len());
        let mut touched_tables = std::collections::BTreeSet::new();
        for (sql, params) in operations {
            let bound: Vec<Box<dyn ToSql>> = params.iter().map(to_sql_value).collect();
            let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows_affected = match tx.execute(sql, params_from_iter(refs)) {
                Ok(n) => n,
                Err(e) => return Err(StorageError::from(e)),
            };
            Self::append_event(&tx, "mutation", tenant_id, sql, params)?;
            touched_tables.insert(extract_table_name(sql).unwrap_or_else(|| "*".to_string()));
            results.push(MutationResult {
                rows_affected,
                insert_id: Some(tx.last_insert_rowid()),
                metadata: QueryMetadata {
                    shard_id: self.shard_id.clone(),
                    execution_time_ms: 0,
                },
            });
        }
        tx.commit().map_err(StorageError::from)?;
        drop(conn);
        let keys: Vec<String> = touched_tables
            .into_iter()
            .map(|table| format!("{tenant_id}:{table}"))
            .collect();
        if !keys.is_empty() {
            self.publish_invalidation(keys);
        }
        let elapsed = start.elapsed().as_millis() as u64;
        for r in results.iter_mut() {
            r.metadata.execution_time_ms = elapsed;
        }
        Ok(results)
    }

    /// `BEGIN | COMMIT | ROLLBACK`. Missing `transaction_id` on
    /// commit/rollback is a defensive no-op success (session churn).
    pub fn transaction(
        &self,
        op: TxnOp,
        tenant_id: &str,
        transaction_id: Option<String>,
    ) -> Result<Option<String>> {
        match op {
            TxnOp::Begin => {
                let id = transaction_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                self.transactions
                    .insert(id.clone(), Transaction::new(id.clone(), tenant_id.to_string()));
                Ok(Some(id))
            }
            TxnOp::Commit => {
                let Some(txn_id) = transaction_id else {
                    return Ok(None);
                };
                let Some((_, mut txn)) = self.transactions.remove(&txn_id) else {
                    return Ok(None);
                };
                self.check_capacity()?;
                let ops: Vec<(String, Vec<Value>)> =
                    txn.queued_ops.drain(..).map(|op| (op.sql, op.params)).collect();
                self.mutation_batch(tenant_id, &ops)?;
                txn.state = TxnState::Committed;
                Ok(Some(txn_id))
            }
            TxnOp::Rollback => {
                let Some(txn_id) = transaction_id else {
                    return Ok(None);
                };
                self.transactions.remove(&txn_id);
                Ok(Some(txn_id))
            }
        }
    }

    /// Auto-rollback any transaction idle longer than `idle_timeout`,
    /// freeing its pool slot (spec §5). Returns the ids of transactions
    /// that were expired, so callers can unpin any session holding one.
    pub fn expire_transactions(&self, idle_timeout: chrono::Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().inactive_for() > idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for txn_id in &expired {
            self.transactions.remove(txn_id);
            tracing::warn!(txn_id = %txn_id, shard_id = %self.shard_id, "transaction idle timeout, auto-rollback");
        }
        expired
    }

    /// Opaque point-in-time token naming the current (or historical) event
    /// offset. `None` means "now".
    pub fn bookmark(&self, at: Option<i64>) -> Result<Bookmark> {
        let conn = self.conn.lock();
        let event_id = match at {
            Some(id) => id,
            None => conn
                .query_row("SELECT COALESCE(MAX(id), 0) FROM _events", [], |r| r.get(0))
                .map_err(StorageError::from)?,
        };
        Ok(Bookmark {
            shard_id: self.shard_id.clone(),
            event_id,
        })
    }

    /// Schedules the next session opened against this engine to read as of
    /// `bookmark` rather than the live tail. The embedded single-file engine
    /// keeps no multi-version history, so this records the marker for the
    /// caller to honor (e.g. by replaying `events(bookmark.event_id, ..)`
    /// forward) rather than performing an actual point-in-time read itself.
    pub fn restore(&self, bookmark: &Bookmark) {
        *self.pending_restore.lock() = Some(bookmark.event_id);
    }

    /// Consumes the marker set by `restore`, if any.
    pub fn take_pending_restore(&self) -> Option<i64> {
        self.pending_restore.lock().take()
    }

    /// Paged export for backfill (C8).
    pub fn export(
        &self,
        table: &str,
        tenant_column: &str,
        tenant_id: &str,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<(Vec<serde_json::Map<String, Value>>, Option<i64>)> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT rowid AS __rowid, * FROM {table} WHERE {tenant_column} = ?1 AND rowid > ?2 ORDER BY rowid LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql).map_err(StorageError::from)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows_iter = stmt
            .query(rusqlite::params![tenant_id, cursor.unwrap_or(0), limit as i64])
            .map_err(StorageError::from)?;
        let mut rows = Vec::new();
        let mut next_cursor = cursor;
        while let Some(row) = rows_iter.next().map_err(StorageError::from)? {
            let mut map = row_to_json(row, &names).map_err(StorageError::from)?;
            if let Some(Value::Number(n)) = map.remove("__rowid") {
                next_cursor = n.as_i64();
            }
            rows.push(map);
        }
        Ok((rows, next_cursor))
    }

    /// Upsert a page of exported rows (C8 backfill target side).
    pub fn import(
        &self,
        table: &str,
        pk: &str,
        rows: &[serde_json::Map<String, Value>],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let mut imported = 0;
        for row in rows {
            let mut cols: Vec<&str> = row.keys().map(|s| s.as_str()).collect();
            cols.retain(|c| *c != "__rowid");
            let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
            let updates: Vec<String> = cols
                .iter()
                .filter(|c| **c != pk)
                .map(|c| format!("{c}=excluded.{c}"))
                .collect();
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT({pk}) DO UPDATE SET {}",
                cols.join(","),
                placeholders.join(","),
                if updates.is_empty() {
                    format!("{pk}={pk}")
                } else {
                    updates.join(",")
                },
            );
            let bound: Vec<Box<dyn ToSql>> =
                cols.iter().map(|c| to_sql_value(row.get(*c).unwrap_or(&Value::Null))).collect();
            let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            match conn.execute(&sql, params_from_iter(refs)) {
                Ok(_) => imported += 1,
                // Unique-constraint conflicts count as "already present".
                Err(e) if matches!(StorageError::from(e), StorageError::ConflictUnique) => {
                    imported += 1;
                }
                Err(e) => return Err(StorageError::from(e)),
            }
        }
        Ok(imported)
    }

    /// `_events` rows with `id > after_id`, ordered by `id` (tail replay).
    pub fn events(&self, after_id: i64, limit: usize) -> Result<Vec<EventRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, ts, type, tenant_id, sql, params FROM _events WHERE id > ?1 ORDER BY id LIMIT ?2")
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(rusqlite::params![after_id, limit as i64], |row| {
                let ts: String = row.get(1)?;
                let params_json: String = row.get(5)?;
                Ok(EventRow {
                    id: row.get(0)?,
                    ts: chrono::DateTime::parse_from_rfc3339(&ts)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    event_type: row.get(2)?,
                    tenant_id: row.get(3)?,
                    sql: row.get(4)?,
                    params: serde_json::from_str(&params_json).unwrap_or_default(),
                })
            })
            .map_err(StorageError::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StorageError::from)?);
        }
        Ok(out)
    }

    pub fn health(&self) -> Health {
        Health {
            shard_id: self.shard_id.clone(),
            ok: true,
            current_size_bytes: self.current_size_bytes(),
        }
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            shard_id: self.shard_id.clone(),
            current_size_bytes: self.current_size_bytes(),
            max_bytes: self.max_bytes,
            open_transactions: self.transactions.len(),
        }
    }
}

/// Cap for the statement-string cache (spec §4.3), applied to each
/// connection in `open`/`open_in_memory` via
/// `set_prepared_statement_cache_capacity`.
pub const ADVISORY_CACHE_CAP: usize = STATEMENT_CACHE_CAP;

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ShardEngine {
        let engine = ShardEngine::open_in_memory("shard-test", 10 * 1024 * 1024 * 1024).unwrap();
        engine
            .ddl(
                "t1",
                "CREATE TABLE accounts (id INTEGER PRIMARY KEY, tenant_id TEXT, balance INTEGER)",
                &[],
            )
            .unwrap();
        engine
    }

    #[test]
    fn mutation_then_query_round_trips() {
        let engine = engine();
        engine
            .mutation(
                "t1",
                "INSERT INTO accounts (id, tenant_id, balance) VALUES (?1, ?2, ?3)",
                &[Value::from(1), Value::from("t1"), Value::from(100)],
                None,
            )
            .unwrap();
        let result = engine
            .query("SELECT balance FROM accounts WHERE id = ?1", &[Value::from(1)])
            .unwrap();
        assert_eq!(result.rows[0]["balance"], Value::from(100));
    }

    #[test]
    fn transaction_commit_applies_all_queued_ops_atomically() {
        let engine = engine();
        engine
            .mutation(
                "t1",
                "INSERT INTO accounts (id, tenant_id, balance) VALUES (1, 't1', 500), (2, 't1', 500)",
                &[],
                None,
            )
            .unwrap();
        let txn_id = engine
            .transaction(TxnOp::Begin, "t1", None)
            .unwrap()
            .unwrap();
        engine
            .mutation(
                "t1",
                "UPDATE accounts SET balance = balance - 100 WHERE id = 1",
                &[],
                Some(&txn_id),
            )
            .unwrap();
        engine
            .mutation(
                "t1",
                "UPDATE accounts SET balance = balance + 100 WHERE id = 2",
                &[],
                Some(&txn_id),
            )
            .unwrap();
        engine
            .transaction(TxnOp::Commit, "t1", Some(txn_id))
            .unwrap();

        let result = engine.query("SELECT SUM(balance) as total FROM accounts", &[]).unwrap();
        assert_eq!(result.rows[0]["total"], Value::from(1000));
    }

    #[test]
    fn transaction_rollback_discards_queue() {
        let engine = engine();
        engine
            .mutation(
                "t1",
                "INSERT INTO accounts (id, tenant_id, balance) VALUES (1, 't1', 500)",
                &[],
                None,
            )
            .unwrap();
        let txn_id = engine.transaction(TxnOp::Begin, "t1", None).unwrap().unwrap();
        engine
            .mutation(
                "t1",
                "UPDATE accounts SET balance = 0 WHERE id = 1",
                &[],
                Some(&txn_id),
            )
            .unwrap();
        engine
            .transaction(TxnOp::Rollback, "t1", Some(txn_id))
            .unwrap();
        let result = engine.query("SELECT balance FROM accounts WHERE id = 1", &[]).unwrap();
        assert_eq!(result.rows[0]["balance"], Value::from(500));
    }

    #[test]
    fn capacity_guard_rejects_mutation_when_full() {
        let engine = ShardEngine::open_in_memory("shard-test", 0).unwrap();
        engine
            .ddl("t1", "CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        let err = engine
            .mutation("t1", "INSERT INTO t (id) VALUES (1)", &[], None)
            .unwrap_err();
        assert!(matches!(err, StorageError::Capacity));
    }

    #[test]
    fn events_are_gap_free_and_increasing() {
        let engine = engine();
        for i in 0..5 {
            engine
                .mutation(
                    "t1",
                    "INSERT INTO accounts (id, tenant_id, balance) VALUES (?1, 't1', 0)",
                    &[Value::from(i)],
                    None,
                )
                .unwrap();
        }
        let events = engine.events(0, 100).unwrap();
        assert_eq!(events.len(), 5);
        for pair in events.windows(2) {
            assert!(pair[1].id > pair[0].id);
        }
    }

    #[test]
    fn missing_transaction_id_on_commit_is_a_noop_success() {
        let engine = engine();
        let result = engine.transaction(TxnOp::Commit, "t1", None);
        assert!(result.is_ok());
    }

    #[test]
    fn restore_schedules_the_bookmarked_event_id_for_the_next_session() {
        let engine = engine();
        let mark = engine.bookmark(None).unwrap();
        engine
            .mutation(
                "t1",
                "INSERT INTO accounts (id, tenant_id, balance) VALUES (1, 't1', 100)",
                &[],
                None,
            )
            .unwrap();
        assert!(engine.take_pending_restore().is_none());
        engine.restore(&mark);
        assert_eq!(engine.take_pending_restore(), Some(mark.event_id));
        assert!(engine.take_pending_restore().is_none());
    }

    #[test]
    fn ddl_invalidates_the_whole_tenant_prefix() {
        let engine = engine();
        let (bus, mut receiver) = EventBus::new(Duration::from_secs(60));
        engine.attach_event_bus(bus);
        engine
            .ddl("t1", "ALTER TABLE accounts ADD COLUMN note TEXT", &[])
            .unwrap();
        let msg = receiver.try_recv().unwrap();
        assert_eq!(msg.keys, vec!["t1:*".to_string()]);
    }
}
