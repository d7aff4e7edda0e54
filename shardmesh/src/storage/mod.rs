//! C3: Shard Storage Engine.

pub mod engine;
pub mod error;
pub mod registry;
pub mod transaction;

pub use engine::{Bookmark, EventRow, Health, Metrics, MutationResult, QueryMetadata, QueryResult, ShardEngine, TxnOp};
pub use error::StorageError;
pub use registry::ShardRegistry;
pub use transaction::{Transaction, TxnState};
