//! Per-shard connection pool (spec §4.7.5, §5).
//!
//! The embedded store already serializes writers internally, so the pool's
//! job here is purely admission control: bound concurrent callers per
//! shard and serve waiters FIFO. Grounded on the teacher's acquire/return
//! discipline (`backend::pool`), implemented with a counting semaphore
//! instead of a live-connection freelist since there is no remote socket
//! to hand out.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

pub struct ShardPool {
    max_per_shard: usize,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl ShardPool {
    pub fn new(max_per_shard: usize) -> Self {
        Self {
            max_per_shard,
            semaphores: DashMap::new(),
        }
    }

    fn semaphore_for(&self, shard_id: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(shard_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_shard)))
            .clone()
    }

    /// Acquire a slot, waiting FIFO if the shard is at capacity. Bounded by
    /// a deadline so a caller never blocks the request forever.
    pub async fn acquire(&self, shard_id: &str, deadline: std::time::Duration) -> Result<OwnedSemaphorePermit> {
        let sem = self.semaphore_for(shard_id);
        match tokio::time::timeout(deadline, sem.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Error::Internal("shard pool semaphore closed".into())),
            Err(_) => Err(Error::Timeout),
        }
    }

    pub fn available(&self, shard_id: &str) -> usize {
        self.semaphore_for(shard_id).available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_blocks_waiters_past_capacity() {
        let pool = ShardPool::new(1);
        let first = pool.acquire("shard-0", Duration::from_millis(50)).await.unwrap();
        let second = pool.acquire("shard-0", Duration::from_millis(20)).await;
        assert!(matches!(second, Err(Error::Timeout)));
        drop(first);
        assert!(pool.acquire("shard-0", Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn distinct_shards_have_independent_capacity() {
        let pool = ShardPool::new(1);
        let _a = pool.acquire("shard-a", Duration::from_millis(50)).await.unwrap();
        assert!(pool.acquire("shard-b", Duration::from_millis(50)).await.is_ok());
    }
}
