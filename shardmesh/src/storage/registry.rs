//! Lazily creates and owns one [`ShardEngine`] per shard id.

use std::path::PathBuf;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::eventbus::EventBus;

use super::engine::ShardEngine;

pub struct ShardRegistry {
    data_dir: PathBuf,
    max_bytes: u64,
    shards: DashMap<String, Arc<ShardEngine>>,
    in_memory: bool,
    event_bus: ArcSwapOption<EventBus>,
}

impl ShardRegistry {
    pub fn new(data_dir: PathBuf, max_bytes: u64) -> Self {
        Self {
            data_dir,
            max_bytes,
            shards: DashMap::new(),
            in_memory: false,
            event_bus: ArcSwapOption::empty(),
        }
    }

    /// Construct a registry backed entirely by in-memory databases, for
    /// tests and for the decoupled `split` unit tests.
    pub fn in_memory(max_bytes: u64) -> Self {
        Self {
            data_dir: PathBuf::new(),
            max_bytes,
            shards: DashMap::new(),
            in_memory: true,
            event_bus: ArcSwapOption::empty(),
        }
    }

    /// Every engine created from this point on (and every engine already
    /// created) publishes invalidations to `bus`.
    pub fn set_event_bus(&self, bus: Arc<EventBus>) {
        for entry in self.shards.iter() {
            entry.value().attach_event_bus(bus.clone());
        }
        self.event_bus.store(Some(bus));
    }

    /// Get or create the engine for a shard id (spec §3: "created on first use").
    pub fn get_or_create(&self, shard_id: &str) -> Result<Arc<ShardEngine>> {
        if let Some(engine) = self.shards.get(shard_id) {
            return Ok(engine.clone());
        }
        let engine = if self.in_memory {
            ShardEngine::open_in_memory(shard_id, self.max_bytes)?
        } else {
            std::fs::create_dir_all(&self.data_dir)
                .map_err(|e| crate::error::Error::Internal(e.to_string()))?;
            let path = self.data_dir.join(format!("{shard_id}.sqlite3"));
            ShardEngine::open(shard_id, &path, self.max_bytes)?
        };
        if let Some(bus) = self.event_bus.load_full() {
            engine.attach_event_bus(bus);
        }
        let engine = Arc::new(engine);
        self.shards.insert(shard_id.to_string(), engine.clone());
        Ok(engine)
    }

    pub fn known_shard_ids(&self) -> Vec<String> {
        self.shards.iter().map(|e| e.key().clone()).collect()
    }
}
