//! C8: Online Shard Split Orchestrator.

pub mod orchestrator;
pub mod plan;

pub use orchestrator::Orchestrator;
pub use plan::{BackfillState, BackfillStatus, PlanMetrics, ShardSplitPlan, TailState, TailStatus};
