use std::collections::HashMap;
use std::time::Duration;

use crate::types::{QueueStrategy, TaskPriority};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Prefix for every queue key, e.g. `crawl_queue`.
    pub queue_prefix: String,

    /// Strategy used when `dequeue` is not given one explicitly.
    pub default_strategy: QueueStrategy,

    /// How long `dequeue` blocks waiting for a task before returning None.
    pub queue_timeout: Duration,
    /// Hard cap for a single task execution.
    pub task_timeout: Duration,
    /// Hard cap for the whole processing step, >= task_timeout.
    pub processing_timeout: Duration,

    /// Default retry budget for tasks that do not carry their own.
    pub max_retries: u32,
    /// Base back-off delay in seconds.
    pub retry_delay_secs: f64,
    /// Back-off multiplier per retry.
    pub retry_backoff: f64,
    /// Cap for the computed back-off delay in seconds.
    pub max_retry_delay_secs: f64,

    /// TTL of the dead-letter list.
    pub dead_letter_ttl_secs: u64,
    /// TTL of the per-worker heartbeat key.
    pub heartbeat_ttl_secs: u64,

    /// How often the metrics snapshot is pushed to the metrics list.
    pub metrics_interval: Duration,
    /// Bound on the persisted metrics history.
    pub metrics_history_limit: usize,

    /// Sampling weights for the weighted round-robin strategy.
    pub strategy_weights: HashMap<TaskPriority, f64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_prefix: "crawl_queue".to_string(),
            default_strategy: QueueStrategy::PriorityFirst,
            queue_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(300),
            processing_timeout: Duration::from_secs(600),
            max_retries: 3,
            retry_delay_secs: 2.0,
            retry_backoff: 2.0,
            max_retry_delay_secs: 300.0,
            dead_letter_ttl_secs: 86_400,
            heartbeat_ttl_secs: 60,
            metrics_interval: Duration::from_secs(60),
            metrics_history_limit: 1000,
            strategy_weights: TaskPriority::ALL
                .iter()
                .map(|p| (*p, p.default_weight()))
                .collect(),
        }
    }
}

impl QueueConfig {
    pub fn bucket_key(&self, priority: TaskPriority) -> String {
        format!("{}:{}", self.queue_prefix, priority.bucket())
    }

    pub fn dead_letter_key(&self) -> String {
        format!("{}:dead_letter", self.queue_prefix)
    }

    pub fn task_status_key(&self) -> String {
        format!("{}:task_status", self.queue_prefix)
    }

    pub fn assignments_key(&self) -> String {
        format!("{}:assignments", self.queue_prefix)
    }

    pub fn workers_key(&self) -> String {
        format!("{}:workers", self.queue_prefix)
    }

    pub fn heartbeat_key(&self, worker_id: &str) -> String {
        format!("{}:worker:{}:heartbeat", self.queue_prefix, worker_id)
    }

    pub fn metrics_key(&self) -> String {
        format!("{}:metrics", self.queue_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schema() {
        let config = QueueConfig::default();
        assert_eq!(config.bucket_key(TaskPriority::Critical), "crawl_queue:critical");
        assert_eq!(config.dead_letter_key(), "crawl_queue:dead_letter");
        assert_eq!(config.task_status_key(), "crawl_queue:task_status");
        assert_eq!(config.heartbeat_key("w1"), "crawl_queue:worker:w1:heartbeat");
    }
}
