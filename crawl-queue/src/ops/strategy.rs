use rand::Rng;
use std::sync::atomic::Ordering;

use crate::error::QueueError;
use crate::queue::PriorityQueue;
use crate::types::{QueueStrategy, QueueTask, TaskPriority};

impl PriorityQueue {
    pub(crate) async fn dequeue_by_strategy(
        &self,
        worker_id: &str,
        strategy: QueueStrategy,
    ) -> Result<Option<QueueTask>, QueueError> {
        match strategy {
            QueueStrategy::PriorityFirst => self.dequeue_priority_first().await,
            QueueStrategy::Fifo => self.dequeue_by_age(false).await,
            QueueStrategy::Lifo => self.dequeue_by_age(true).await,
            QueueStrategy::RoundRobin => self.dequeue_round_robin().await,
            QueueStrategy::WeightedRoundRobin => self.dequeue_weighted_round_robin().await,
            QueueStrategy::LeastConnections => self.dequeue_least_connections(worker_id).await,
            QueueStrategy::FairShare => self.dequeue_fair_share(worker_id).await,
        }
    }

    /// Scan buckets CRITICAL -> BATCH, pop the min-score entry of the first
    /// non-empty one.
    async fn dequeue_priority_first(&self) -> Result<Option<QueueTask>, QueueError> {
        for priority in TaskPriority::ALL {
            if let Some(task) = self.pop_bucket(priority).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Globally oldest (`newest = false`) or newest (`newest = true`) task
    /// by `created_at`, across all buckets. Peek each bucket, then claim the
    /// winner; if another worker claimed it first, report empty and let the
    /// caller poll again.
    async fn dequeue_by_age(&self, newest: bool) -> Result<Option<QueueTask>, QueueError> {
        let mut best: Option<(TaskPriority, String, QueueTask)> = None;
        for priority in TaskPriority::ALL {
            let Some((member, task)) = self.peek_bucket(priority, newest).await? else {
                continue;
            };
            if !task.is_visible(chrono::Utc::now()) {
                continue;
            }
            let replace = match &best {
                None => true,
                Some((_, _, current)) => {
                    if newest {
                        task.created_at > current.created_at
                    } else {
                        task.created_at < current.created_at
                    }
                }
            };
            if replace {
                best = Some((priority, member, task));
            }
        }

        let Some((priority, member, task)) = best else {
            return Ok(None);
        };
        if self.take_member(priority, &member).await? {
            Ok(Some(task))
        } else {
            Ok(None)
        }
    }

    /// Rotate the starting bucket on each call, then scan in rotated order.
    async fn dequeue_round_robin(&self) -> Result<Option<QueueTask>, QueueError> {
        let start = self.inner.round_robin.fetch_add(1, Ordering::Relaxed);
        let count = TaskPriority::ALL.len();
        for i in 0..count {
            let priority = TaskPriority::ALL[(start + i) % count];
            if let Some(task) = self.pop_bucket(priority).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Sample a bucket with probability proportional to its configured
    /// weight; fall back to priority-first if the sampled bucket is empty.
    async fn dequeue_weighted_round_robin(&self) -> Result<Option<QueueTask>, QueueError> {
        let weights = &self.inner.config.strategy_weights;
        let total: f64 = weights.values().sum();

        let selected = if total > 0.0 {
            let mut roll = rand::thread_rng().gen_range(0.0..total);
            let mut selected = TaskPriority::Normal;
            for priority in TaskPriority::ALL {
                let weight = weights.get(&priority).copied().unwrap_or(0.0);
                if roll < weight {
                    selected = priority;
                    break;
                }
                roll -= weight;
            }
            selected
        } else {
            TaskPriority::Normal
        };

        if let Some(task) = self.pop_bucket(selected).await? {
            return Ok(Some(task));
        }
        self.dequeue_priority_first().await
    }

    /// A heavily loaded caller is steered toward the low-priority buckets so
    /// lighter workers pick up the urgent work.
    async fn dequeue_least_connections(
        &self,
        worker_id: &str,
    ) -> Result<Option<QueueTask>, QueueError> {
        let order: Vec<TaskPriority> = if self.worker_load(worker_id) > 5 {
            TaskPriority::ALL.iter().rev().copied().collect()
        } else {
            TaskPriority::ALL.to_vec()
        };
        for priority in order {
            if let Some(task) = self.pop_bucket(priority).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// A caller holding more than its 1/N share of in-flight tasks is
    /// restricted to the LOW and BATCH buckets.
    async fn dequeue_fair_share(&self, worker_id: &str) -> Result<Option<QueueTask>, QueueError> {
        let total_workers = self
            .inner
            .client
            .hlen(self.inner.config.workers_key())
            .await?;
        if total_workers == 0 {
            return self.dequeue_priority_first().await;
        }

        let fair_share = self.processing_count() as f64 / total_workers as f64;
        let over_share = self.worker_load(worker_id) as f64 > fair_share;

        let order: &[TaskPriority] = if over_share {
            &[TaskPriority::Low, TaskPriority::Batch]
        } else {
            &TaskPriority::ALL
        };
        for priority in order {
            if let Some(task) = self.pop_bucket(*priority).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }
}
