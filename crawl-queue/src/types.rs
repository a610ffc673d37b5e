use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::metrics_state::QueueMetrics;

/// Priority buckets, highest first. The ordinal feeds the queue score, so
/// the declaration order is load-bearing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
    Batch,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
        TaskPriority::Batch,
    ];

    pub fn ordinal(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
            TaskPriority::Batch => 4,
        }
    }

    /// Bucket name used in the cache-store key schema.
    pub fn bucket(self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
            TaskPriority::Batch => "batch",
        }
    }

    /// Default sampling weight for the weighted round-robin strategy.
    pub fn default_weight(self) -> f64 {
        match self {
            TaskPriority::Critical => 1.0,
            TaskPriority::High => 0.8,
            TaskPriority::Normal => 0.6,
            TaskPriority::Low => 0.4,
            TaskPriority::Batch => 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
    Expired,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Expired | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStrategy {
    PriorityFirst,
    Fifo,
    Lifo,
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    FairShare,
}

impl FromStr for QueueStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "priority_first" => Ok(QueueStrategy::PriorityFirst),
            "fifo" => Ok(QueueStrategy::Fifo),
            "lifo" => Ok(QueueStrategy::Lifo),
            "round_robin" => Ok(QueueStrategy::RoundRobin),
            "weighted_rr" | "weighted_round_robin" => Ok(QueueStrategy::WeightedRoundRobin),
            "least_conn" | "least_connections" => Ok(QueueStrategy::LeastConnections),
            "fair_share" => Ok(QueueStrategy::FairShare),
            other => Err(format!("unknown queue strategy: {other}")),
        }
    }
}

fn default_version() -> u16 {
    1
}

/// A crawl task as it travels through the queue. The full task is stored in
/// the task-status hash; the sorted sets only carry the task id, so an id can
/// never sit in a bucket twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    #[serde(default = "default_version")]
    pub version: u16,
    pub id: String,
    pub url: String,
    pub platform: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl QueueTask {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        platform: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            version: default_version(),
            id: id.into(),
            url: url.into(),
            platform: platform.into(),
            priority,
            status: TaskStatus::Pending,
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
            scheduled_at: None,
            expires_at: None,
            max_retries: 3,
            retry_count: 0,
            session_id: None,
            worker_id: None,
            tags: Vec::new(),
            last_error: None,
            result: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// A delayed or retrying task is invisible to dequeue until its
    /// scheduled time.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// task_id -> worker_id binding, mirrored in the assignments hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default = "default_version")]
    pub version: u16,
    pub task_id: String,
    pub worker_id: String,
    pub assigned_at: DateTime<Utc>,
    pub priority: TaskPriority,
    #[serde(default)]
    pub estimated_duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    #[serde(default = "default_version")]
    pub version: u16,
    pub id: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: String,
}

/// Final snapshot of a task that exhausted its retries (or carried a corrupt
/// payload), pushed to the TTL-bounded dead-letter list for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    #[serde(default = "default_version")]
    pub version: u16,
    pub task: QueueTask,
    pub final_error: String,
    pub moved_at: DateTime<Utc>,
}

/// The status-endpoint view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_depths: HashMap<String, u64>,
    pub dead_letter_depth: u64,
    pub metrics: QueueMetrics,
    pub active_workers: u64,
    pub total_assignments: u64,
    pub cache_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordinals_are_ordered() {
        let ordinals: Vec<u8> = TaskPriority::ALL.iter().map(|p| p.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::to_string(&TaskPriority::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_task_roundtrip() {
        let task = QueueTask::new("t1", "https://example.test/a", "weibo", TaskPriority::High);
        let json = serde_json::to_string(&task).unwrap();
        let back: QueueTask = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn test_visibility_and_expiry() {
        let now = Utc::now();
        let mut task = QueueTask::new("t1", "u", "p", TaskPriority::Normal);
        assert!(task.is_visible(now));
        assert!(!task.is_expired(now));

        task.scheduled_at = Some(now + chrono::Duration::seconds(30));
        assert!(!task.is_visible(now));

        task.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(task.is_expired(now));
    }

    #[test]
    fn test_strategy_parses_aliases() {
        assert_eq!(
            "weighted_rr".parse::<QueueStrategy>().unwrap(),
            QueueStrategy::WeightedRoundRobin
        );
        assert_eq!(
            "least_conn".parse::<QueueStrategy>().unwrap(),
            QueueStrategy::LeastConnections
        );
        assert!("bogus".parse::<QueueStrategy>().is_err());
    }
}
