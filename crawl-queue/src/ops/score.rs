use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::QueueConfig;
use crate::types::QueueTask;

/// Deterministic priority score: lower sorts first. The base separates the
/// buckets, creation time gives FIFO order inside a bucket, retries are
/// pushed slightly back, and a pending delay moves the entry behind every
/// live task of its bucket until it becomes visible.
pub fn priority_score(task: &QueueTask, now: DateTime<Utc>) -> f64 {
    let base = task.priority.ordinal() as f64 * 1000.0;
    let time_factor = task.created_at.timestamp() as f64;
    let retry_factor = task.retry_count as f64 * 10.0;
    let delay_offset = match task.scheduled_at {
        Some(at) if at > now => (at - now).num_seconds() as f64 * 1000.0,
        _ => 0.0,
    };
    base + time_factor + retry_factor + delay_offset
}

/// Exponential back-off for the queue's own retry path:
/// `base * factor^retry_count`, capped.
pub fn retry_delay(config: &QueueConfig, retry_count: u32) -> Duration {
    let secs = config.retry_delay_secs * config.retry_backoff.powi(retry_count as i32);
    let capped = secs.min(config.max_retry_delay_secs).max(0.0);
    Duration::from_secs_f64(capped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;

    fn task_at(priority: TaskPriority, created_unix: i64) -> QueueTask {
        let mut task = QueueTask::new("t", "u", "p", priority);
        task.created_at = DateTime::from_timestamp(created_unix, 0).unwrap();
        task
    }

    #[test]
    fn test_score_separates_buckets() {
        let now = Utc::now();
        // A HIGH task created much later still beats a NORMAL task within the
        // same epoch window only via its bucket base.
        let high = task_at(TaskPriority::High, 200);
        let normal = task_at(TaskPriority::Normal, 50);
        assert!(priority_score(&high, now) < priority_score(&normal, now));
    }

    #[test]
    fn test_score_is_fifo_within_bucket() {
        let now = Utc::now();
        let older = task_at(TaskPriority::Normal, 50);
        let newer = task_at(TaskPriority::Normal, 100);
        assert!(priority_score(&older, now) < priority_score(&newer, now));
    }

    #[test]
    fn test_retries_sort_behind_fresh_tasks() {
        let now = Utc::now();
        let fresh = task_at(TaskPriority::Normal, 100);
        let mut retried = task_at(TaskPriority::Normal, 100);
        retried.retry_count = 2;
        assert!(priority_score(&fresh, now) < priority_score(&retried, now));
    }

    #[test]
    fn test_retry_delay_progression() {
        let config = QueueConfig {
            retry_delay_secs: 2.0,
            retry_backoff: 2.0,
            max_retry_delay_secs: 60.0,
            ..QueueConfig::default()
        };
        let delays: Vec<u64> = (0..4).map(|n| retry_delay(&config, n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16]);
        // Capped.
        assert_eq!(retry_delay(&config, 10).as_secs(), 60);
    }
}
