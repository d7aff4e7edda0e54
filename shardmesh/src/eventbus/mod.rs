//! C4: Event Bus.
//!
//! At-least-once queue of change notifications produced by C3 and consumed
//! to drive C6 invalidation. Ordering is not guaranteed across shards;
//! the consumer must be idempotent (spec §4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cache::CacheEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Invalidate,
    Prewarm,
    D1Sync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub message_id: String,
    pub event_type: EventType,
    pub shard_id: String,
    /// Monotonic per shard.
    pub version: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    /// `"<tenantId>:<table>"` prefixes touched by the originating write.
    pub keys: Vec<String>,
}

struct ShardVersions {
    counters: DashMap<String, AtomicU64>,
}

impl ShardVersions {
    fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn next(&self, shard_id: &str) -> u64 {
        self.counters
            .entry(shard_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }
}

/// Captures messages the consumer permanently failed to process.
pub struct DeadLetterSink {
    entries: Mutex<Vec<BusMessage>>,
}

impl DeadLetterSink {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn drain(&self) -> Vec<BusMessage> {
        std::mem::take(&mut self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Producer-facing handle plus the background consumer loop.
pub struct EventBus {
    sender: mpsc::UnboundedSender<BusMessage>,
    versions: ShardVersions,
    processed: DashMap<String, Instant>,
    processed_ttl: Duration,
    dead_letters: Arc<DeadLetterSink>,
}

impl EventBus {
    pub fn new(processed_ttl: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<BusMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            sender,
            versions: ShardVersions::new(),
            processed: DashMap::new(),
            processed_ttl,
            dead_letters: Arc::new(DeadLetterSink::new()),
        });
        (bus, receiver)
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterSink> {
        self.dead_letters.clone()
    }

    /// Producer side: called by C3 on every successful mutation/DDL/batch.
    pub fn publish(&self, shard_id: &str, event_type: EventType, keys: Vec<String>) {
        let message = BusMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            shard_id: shard_id.to_string(),
            version: self.versions.next(shard_id),
            ts: chrono::Utc::now(),
            keys,
        };
        // Delivery is at-least-once: a dropped receiver only loses future
        // capacity to consume, it never blocks the producer.
        let _ = self.sender.send(message);
    }

    /// `true` if this message was already applied (idempotence, spec §8.6).
    fn already_processed(&self, message_id: &str) -> bool {
        if let Some(seen_at) = self.processed.get(message_id) {
            if seen_at.elapsed() < self.processed_ttl {
                return true;
            }
        }
        false
    }

    fn mark_processed(&self, message_id: &str) {
        self.processed.insert(message_id.to_string(), Instant::now());
    }

    /// Drive the batching consumer loop until the channel closes. Consumes
    /// in batches of up to `batch_size` with a `max_wait` ceiling,
    /// aggregates unique `(tenant, table)` prefixes, and issues one
    /// prefix-delete per prefix against the cache.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<BusMessage>,
        cache: Arc<CacheEngine>,
        batch_size: usize,
        max_wait: Duration,
    ) {
        loop {
            let mut batch = Vec::with_capacity(batch_size);
            let deadline = Instant::now() + max_wait;
            while batch.len() < batch_size {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, receiver.recv()).await {
                    Ok(Some(msg)) => batch.push(msg),
                    Ok(None) => {
                        if !batch.is_empty() {
                            self.process_batch(&batch, &cache);
                        }
                        return;
                    }
                    Err(_) => break,
                }
            }
            if !batch.is_empty() {
                self.process_batch(&batch, &cache);
            }
        }
    }

    fn process_batch(&self, batch: &[BusMessage], cache: &Arc<CacheEngine>) {
        let mut prefixes = std::collections::BTreeSet::new();
        for msg in batch {
            if self.already_processed(&msg.message_id) {
                continue;
            }
            match msg.event_type {
                EventType::Invalidate => {
                    for key in &msg.keys {
                        // keys arrive as "<tenantId>:<table>"; materialized
                        // query keys live under "<tenantId>:q:<table>:...".
                        match key.split_once(':') {
                            Some((tenant_id, "*")) => prefixes.insert(format!("{tenant_id}:q:")),
                            Some((tenant_id, table)) => prefixes.insert(format!("{tenant_id}:q:{table}:")),
                            None => prefixes.insert(format!("{key}:q:")),
                        };
                    }
                }
                EventType::Prewarm | EventType::D1Sync => {}
            }
            self.mark_processed(&msg.message_id);
        }
        for prefix in prefixes {
            cache.delete_by_prefix(&prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheDefaults;

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let cache = Arc::new(CacheEngine::new(CacheDefaults::default()));
        let (bus, receiver) = EventBus::new(Duration::from_secs(600));
        cache.warm_for_test("t1:q:users:abc123", serde_json::json!(["row"]));
        bus.publish("shard-0", EventType::Invalidate, vec!["t1:users".into()]);
        let consumer = tokio::spawn(bus.clone().run(receiver, cache.clone(), 50, Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        consumer.abort();
        assert!(cache.get_for_test("t1:q:users:abc123").is_none());
    }
}
