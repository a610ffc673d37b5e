use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{QueueTask, TaskPriority};

/// Rolling queue counters, published to the metrics list and the status
/// endpoint. Lives behind the queue's metrics mutex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub processing_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,

    /// Enqueue counts per priority bucket name.
    pub priority_distribution: HashMap<String, u64>,
    /// Local view of per-bucket depth (enqueues minus dequeues).
    pub queue_depth: HashMap<String, u64>,

    pub avg_processing_time_secs: f64,
    /// Completed tasks per second since the previous snapshot.
    pub throughput: f64,
    pub error_rate: f64,
    pub retry_rate: f64,

    pub timestamp: DateTime<Utc>,
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self {
            total_tasks: 0,
            pending_tasks: 0,
            processing_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            priority_distribution: HashMap::new(),
            queue_depth: HashMap::new(),
            avg_processing_time_secs: 0.0,
            throughput: 0.0,
            error_rate: 0.0,
            retry_rate: 0.0,
            timestamp: Utc::now(),
        }
    }
}

impl QueueMetrics {
    pub fn on_enqueue(&mut self, task: &QueueTask) {
        self.total_tasks += 1;
        self.pending_tasks += 1;
        *self
            .priority_distribution
            .entry(task.priority.bucket().to_string())
            .or_insert(0) += 1;
        *self
            .queue_depth
            .entry(task.priority.bucket().to_string())
            .or_insert(0) += 1;
    }

    pub fn on_dequeue(&mut self, priority: TaskPriority) {
        self.pending_tasks = self.pending_tasks.saturating_sub(1);
        self.processing_tasks += 1;
        if let Some(depth) = self.queue_depth.get_mut(priority.bucket()) {
            *depth = depth.saturating_sub(1);
        }
    }

    pub fn on_completion(&mut self, success: bool, processing_time_secs: Option<f64>) {
        self.processing_tasks = self.processing_tasks.saturating_sub(1);
        if success {
            self.completed_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }

        if let Some(secs) = processing_time_secs {
            let finished = self.completed_tasks + self.failed_tasks;
            if finished <= 1 {
                self.avg_processing_time_secs = secs;
            } else {
                self.avg_processing_time_secs = (self.avg_processing_time_secs
                    * (finished - 1) as f64
                    + secs)
                    / finished as f64;
            }
        }

        let finished = self.completed_tasks + self.failed_tasks;
        if finished > 0 {
            self.error_rate = self.failed_tasks as f64 / finished as f64;
        }
    }

    pub fn on_retry(&mut self) {
        self.processing_tasks = self.processing_tasks.saturating_sub(1);
        if self.total_tasks > 0 {
            self.retry_rate =
                (self.retry_rate * self.total_tasks as f64 + 1.0) / self.total_tasks as f64;
        }
    }

    /// Produce the next published snapshot, deriving throughput from the
    /// previous one.
    pub fn snapshot(&mut self, previous: Option<&QueueMetrics>) -> QueueMetrics {
        self.timestamp = Utc::now();
        if let Some(prev) = previous {
            let elapsed = (self.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 {
                let completed_diff = self.completed_tasks.saturating_sub(prev.completed_tasks);
                self.throughput = completed_diff as f64 / elapsed;
            }
        }
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_follow_task_lifecycle() {
        let mut metrics = QueueMetrics::default();
        let task = QueueTask::new("t", "u", "p", TaskPriority::High);

        metrics.on_enqueue(&task);
        assert_eq!(metrics.pending_tasks, 1);
        assert_eq!(metrics.queue_depth.get("high"), Some(&1));

        metrics.on_dequeue(TaskPriority::High);
        assert_eq!(metrics.pending_tasks, 0);
        assert_eq!(metrics.processing_tasks, 1);
        assert_eq!(metrics.queue_depth.get("high"), Some(&0));

        metrics.on_completion(true, Some(2.0));
        assert_eq!(metrics.completed_tasks, 1);
        assert_eq!(metrics.processing_tasks, 0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.avg_processing_time_secs, 2.0);
    }

    #[test]
    fn test_error_rate() {
        let mut metrics = QueueMetrics::default();
        let task = QueueTask::new("t", "u", "p", TaskPriority::Normal);
        for _ in 0..4 {
            metrics.on_enqueue(&task);
            metrics.on_dequeue(TaskPriority::Normal);
        }
        metrics.on_completion(true, None);
        metrics.on_completion(true, None);
        metrics.on_completion(false, None);
        metrics.on_completion(false, None);
        assert_eq!(metrics.error_rate, 0.5);
    }
}
