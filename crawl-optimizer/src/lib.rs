mod config;
mod optimizer;
mod snapshot;

pub use config::{OptimizationStrategy, OptimizerConfig, ScalingRule, ScalingTrigger};
pub use optimizer::{ActionType, Baseline, OptimizationAction, OptimizerStats, PoolOptimizer};
pub use snapshot::{PoolSnapshot, SystemSampler, SystemSnapshot};
