use std::collections::HashMap;

use crawl_queue::TaskPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    RoundRobin,
    LeastLoaded,
    PerformanceBased,
    Intelligent,
}

#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub policy: SchedulingPolicy,
    pub max_workers: usize,
    pub min_workers: usize,
    /// Seconds of inactivity before a worker is flagged stale.
    pub idle_timeout_secs: i64,
    /// Consecutive stale flags before a worker is moved to MAINTENANCE.
    pub stale_flags_for_maintenance: u32,
    /// Consecutive failures before a worker is marked FAILED.
    pub consecutive_failure_limit: u32,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub rebalance_interval_secs: u64,
    /// Per-priority weight used by the intelligent policy.
    pub priority_weights: HashMap<TaskPriority, f64>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::Intelligent,
            max_workers: 10,
            min_workers: 2,
            idle_timeout_secs: 300,
            stale_flags_for_maintenance: 3,
            consecutive_failure_limit: 5,
            scale_up_threshold: 0.7,
            scale_down_threshold: 0.3,
            rebalance_interval_secs: 60,
            priority_weights: TaskPriority::ALL
                .iter()
                .map(|p| (*p, p.default_weight()))
                .collect(),
        }
    }
}
