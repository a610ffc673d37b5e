use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use common_redis::{Client, CustomRedisError, Pipeline};
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::metrics_state::QueueMetrics;
use crate::ops::score::{priority_score, retry_delay};
use crate::types::{
    Assignment, DeadLetterEntry, QueueStatus, QueueStrategy, QueueTask, TaskPriority, TaskStatus,
    WorkerRegistration,
};

const ENQUEUED_COUNTER: &str = "crawl_queue_enqueued_total";
const DEQUEUED_COUNTER: &str = "crawl_queue_dequeued_total";
const DEAD_LETTER_COUNTER: &str = "crawl_queue_dead_lettered_total";
const EVICTED_WORKERS_COUNTER: &str = "crawl_queue_evicted_workers_total";

pub(crate) struct Inner {
    pub(crate) config: QueueConfig,
    pub(crate) client: Arc<dyn Client + Send + Sync>,
    pub(crate) round_robin: AtomicUsize,
    /// In-memory per-worker in-flight counts, feeding the least-connections
    /// and fair-share strategies.
    pub(crate) connections: Mutex<HashMap<String, u32>>,
    pub(crate) metrics: Mutex<QueueMetrics>,
    last_snapshot: Mutex<Option<QueueMetrics>>,
}

/// Redis-backed multi-priority task queue. Cheap to clone; all clones share
/// state through the cache store and the inner handle.
#[derive(Clone)]
pub struct PriorityQueue {
    pub(crate) inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PriorityQueue {
    pub fn new(client: Arc<dyn Client + Send + Sync>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                round_robin: AtomicUsize::new(0),
                connections: Mutex::new(HashMap::new()),
                metrics: Mutex::new(QueueMetrics::default()),
                last_snapshot: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn client(&self) -> &(dyn Client + Send + Sync) {
        self.inner.client.as_ref()
    }

    /// Place a task into its priority bucket. Atomic with the task-status
    /// write through a MULTI/EXEC pipeline. A re-enqueue of the same id
    /// replaces the previous entry (the member is the id).
    pub async fn enqueue(
        &self,
        mut task: QueueTask,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        task.status = TaskStatus::Queued;
        if let Some(delay) = delay {
            if !delay.is_zero() {
                task.scheduled_at =
                    Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64));
            }
        }

        let score = priority_score(&task, now);
        let bucket_key = self.inner.config.bucket_key(task.priority);
        let task_json = serde_json::to_string(&task)?;

        let results = Pipeline::new(self.client())
            .zadd(bucket_key, task.id.clone(), score)
            .hset(self.inner.config.task_status_key(), task.id.clone(), task_json)
            .execute()
            .await?;
        for result in results {
            result?;
        }

        lock(&self.inner.metrics).on_enqueue(&task);
        common_metrics::inc(
            ENQUEUED_COUNTER,
            &[("priority".to_string(), task.priority.bucket().to_string())],
            1,
        );
        debug!(task_id = %task.id, priority = task.priority.bucket(), "task enqueued");
        Ok(())
    }

    /// Return at most one task, marked PROCESSING and assigned to
    /// `worker_id`. Blocks up to `timeout` (default `queue_timeout`).
    pub async fn dequeue(
        &self,
        worker_id: &str,
        strategy: Option<QueueStrategy>,
        timeout: Option<Duration>,
    ) -> Result<Option<QueueTask>, QueueError> {
        let strategy = strategy.unwrap_or(self.inner.config.default_strategy);
        let timeout = timeout.unwrap_or(self.inner.config.queue_timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        self.register_worker(worker_id).await?;

        loop {
            if let Some(task) = self.dequeue_once(worker_id, strategy).await? {
                return Ok(Some(task));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn dequeue_once(
        &self,
        worker_id: &str,
        strategy: QueueStrategy,
    ) -> Result<Option<QueueTask>, QueueError> {
        let Some(mut task) = self.dequeue_by_strategy(worker_id, strategy).await? else {
            return Ok(None);
        };

        task.status = TaskStatus::Processing;
        task.worker_id = Some(worker_id.to_string());

        let assignment = Assignment {
            version: 1,
            task_id: task.id.clone(),
            worker_id: worker_id.to_string(),
            assigned_at: Utc::now(),
            priority: task.priority,
            estimated_duration_secs: 0.0,
        };

        let results = Pipeline::new(self.client())
            .hset(
                self.inner.config.task_status_key(),
                task.id.clone(),
                serde_json::to_string(&task)?,
            )
            .hset(
                self.inner.config.assignments_key(),
                task.id.clone(),
                serde_json::to_string(&assignment)?,
            )
            .execute()
            .await?;
        for result in results {
            result?;
        }

        *lock(&self.inner.connections)
            .entry(worker_id.to_string())
            .or_insert(0) += 1;
        lock(&self.inner.metrics).on_dequeue(task.priority);
        common_metrics::inc(
            DEQUEUED_COUNTER,
            &[("priority".to_string(), task.priority.bucket().to_string())],
            1,
        );
        debug!(task_id = %task.id, worker_id, "task dequeued");
        Ok(Some(task))
    }

    /// Pop the lowest-score entry of a bucket, skipping expired tasks and
    /// re-inserting entries that are not yet visible. Corrupt entries go
    /// straight to the dead letter list and are never re-enqueued.
    pub(crate) async fn pop_bucket(
        &self,
        priority: TaskPriority,
    ) -> Result<Option<QueueTask>, QueueError> {
        let bucket_key = self.inner.config.bucket_key(priority);
        loop {
            let popped = self.client().zpopmin(bucket_key.clone(), 1).await?;
            let Some((member, score)) = popped.into_iter().next() else {
                return Ok(None);
            };

            match self.load_task(&member).await {
                Ok(Some(task)) => {
                    let now = Utc::now();
                    if task.is_expired(now) {
                        self.mark_expired(task).await?;
                        continue;
                    }
                    if !task.is_visible(now) {
                        // Not due yet: put it back where it was and report the
                        // bucket as empty for this scan.
                        self.client().zadd(bucket_key, member, score).await?;
                        return Ok(None);
                    }
                    return Ok(Some(task));
                }
                Ok(None) | Err(QueueError::Serialization(_)) => {
                    self.dead_letter_corrupt(&member).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read the lowest- or highest-score entry of a bucket without removing
    /// it. Used by the FIFO/LIFO strategies to compare across buckets.
    pub(crate) async fn peek_bucket(
        &self,
        priority: TaskPriority,
        newest: bool,
    ) -> Result<Option<(String, QueueTask)>, QueueError> {
        let bucket_key = self.inner.config.bucket_key(priority);
        let entries = if newest {
            self.client()
                .zrevrange_with_scores(bucket_key, 0, 0)
                .await?
        } else {
            self.client().zrange_with_scores(bucket_key, 0, 0).await?
        };
        let Some((member, _)) = entries.into_iter().next() else {
            return Ok(None);
        };
        match self.load_task(&member).await {
            Ok(Some(task)) => Ok(Some((member, task))),
            Ok(None) | Err(QueueError::Serialization(_)) => {
                // Claim it so it cannot wedge the peek forever.
                if self
                    .client()
                    .zrem(self.inner.config.bucket_key(priority), member.clone())
                    .await?
                {
                    self.dead_letter_corrupt(&member).await?;
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically claim a peeked entry. Returns false if another worker took
    /// it first.
    pub(crate) async fn take_member(
        &self,
        priority: TaskPriority,
        member: &str,
    ) -> Result<bool, QueueError> {
        Ok(self
            .client()
            .zrem(self.inner.config.bucket_key(priority), member.to_string())
            .await?)
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<QueueTask>, QueueError> {
        match self
            .client()
            .hget(self.inner.config.task_status_key(), task_id.to_string())
            .await
        {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(CustomRedisError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_expired(&self, mut task: QueueTask) -> Result<(), QueueError> {
        task.status = TaskStatus::Expired;
        self.write_task(&task).await?;
        debug!(task_id = %task.id, "task expired before dequeue");
        Ok(())
    }

    async fn dead_letter_corrupt(&self, member: &str) -> Result<(), QueueError> {
        warn!(member, "corrupt queue entry, moving to dead letter");
        let mut placeholder = QueueTask::new(member, "", "", TaskPriority::Normal);
        placeholder.status = TaskStatus::Failed;
        self.push_dead_letter(placeholder, "corrupt payload: undecodable task snapshot")
            .await
    }

    async fn push_dead_letter(&self, task: QueueTask, error: &str) -> Result<(), QueueError> {
        let entry = DeadLetterEntry {
            version: 1,
            task,
            final_error: error.to_string(),
            moved_at: Utc::now(),
        };
        let key = self.inner.config.dead_letter_key();
        self.client()
            .lpush(key.clone(), serde_json::to_string(&entry)?)
            .await?;
        self.client()
            .expire(key, self.inner.config.dead_letter_ttl_secs)
            .await?;
        common_metrics::inc(DEAD_LETTER_COUNTER, &[], 1);
        Ok(())
    }

    async fn write_task(&self, task: &QueueTask) -> Result<(), QueueError> {
        self.client()
            .hset(
                self.inner.config.task_status_key(),
                task.id.clone(),
                serde_json::to_string(task)?,
            )
            .await?;
        Ok(())
    }

    /// Mark a task COMPLETED and drop its assignment. Idempotent per task
    /// id: only a PROCESSING task transitions, so a late completion from an
    /// evicted worker is ignored.
    pub async fn complete(
        &self,
        task_id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<(), QueueError> {
        let Some(mut task) = self.load_task(task_id).await? else {
            return Err(QueueError::UnknownTask(task_id.to_string()));
        };
        if task.status != TaskStatus::Processing {
            debug!(task_id, status = ?task.status, "ignoring completion for non-processing task");
            return Ok(());
        }

        let processing_secs = self.assignment_age_secs(task_id).await;
        task.status = TaskStatus::Completed;
        task.result = result;
        self.write_task(&task).await?;
        self.cleanup_assignment(task_id).await?;
        lock(&self.inner.metrics).on_completion(true, processing_secs);
        debug!(task_id, "task completed");
        Ok(())
    }

    /// Mark a task failed. With `retry = true` and budget remaining, the task
    /// is scheduled for a delayed re-enqueue with exponential back-off; this
    /// is the single authoritative retry-scheduling path. Otherwise the final
    /// snapshot moves to the dead letter list and the task is FAILED.
    pub async fn fail(&self, task_id: &str, error: &str, retry: bool) -> Result<(), QueueError> {
        let Some(mut task) = self.load_task(task_id).await? else {
            return Err(QueueError::UnknownTask(task_id.to_string()));
        };
        if task.status != TaskStatus::Processing {
            debug!(task_id, status = ?task.status, "ignoring failure for non-processing task");
            return Ok(());
        }

        let processing_secs = self.assignment_age_secs(task_id).await;
        task.last_error = Some(error.to_string());
        self.cleanup_assignment(task_id).await?;

        if retry && task.retry_count < task.max_retries {
            let delay = retry_delay(&self.inner.config, task.retry_count);
            task.retry_count += 1;
            task.status = TaskStatus::Retrying;
            task.scheduled_at =
                Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
            task.worker_id = None;
            self.write_task(&task).await?;
            lock(&self.inner.metrics).on_retry();
            debug!(
                task_id,
                retry_count = task.retry_count,
                delay_secs = delay.as_secs_f64(),
                "task scheduled for retry"
            );

            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut task = task;
                task.status = TaskStatus::Pending;
                task.scheduled_at = None;
                if let Err(e) = queue.enqueue(task, None).await {
                    warn!("delayed re-enqueue failed: {e}");
                }
            });
            return Ok(());
        }

        task.status = TaskStatus::Failed;
        self.write_task(&task).await?;
        self.push_dead_letter(task, error).await?;
        lock(&self.inner.metrics).on_completion(false, processing_secs);
        debug!(task_id, error, "task failed terminally");
        Ok(())
    }

    async fn assignment_age_secs(&self, task_id: &str) -> Option<f64> {
        let json = self
            .client()
            .hget(self.inner.config.assignments_key(), task_id.to_string())
            .await
            .ok()?;
        let assignment: Assignment = serde_json::from_str(&json).ok()?;
        Some(
            (Utc::now() - assignment.assigned_at).num_milliseconds() as f64 / 1000.0,
        )
    }

    async fn cleanup_assignment(&self, task_id: &str) -> Result<(), QueueError> {
        let assignments_key = self.inner.config.assignments_key();
        if let Ok(json) = self
            .client()
            .hget(assignments_key.clone(), task_id.to_string())
            .await
        {
            if let Ok(assignment) = serde_json::from_str::<Assignment>(&json) {
                let mut connections = lock(&self.inner.connections);
                if let Some(count) = connections.get_mut(&assignment.worker_id) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        self.client()
            .hdel(assignments_key, task_id.to_string())
            .await?;
        Ok(())
    }

    /// Register a worker and refresh its heartbeat key.
    pub async fn register_worker(&self, worker_id: &str) -> Result<(), QueueError> {
        let now = Utc::now();
        let registration = WorkerRegistration {
            version: 1,
            id: worker_id.to_string(),
            registered_at: now,
            last_seen: now,
            status: "active".to_string(),
        };
        self.client()
            .hset(
                self.inner.config.workers_key(),
                worker_id.to_string(),
                serde_json::to_string(&registration)?,
            )
            .await?;
        self.heartbeat(worker_id).await
    }

    /// Refresh the TTL-bounded heartbeat key for a worker.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), QueueError> {
        self.client()
            .setex(
                self.inner.config.heartbeat_key(worker_id),
                Utc::now().to_rfc3339(),
                self.inner.config.heartbeat_ttl_secs,
            )
            .await?;
        Ok(())
    }

    /// Identify workers whose heartbeat expired, re-enqueue their in-flight
    /// tasks as PENDING and drop them from the registry. Returns the number
    /// of evicted workers.
    pub async fn sweep_stale_workers(&self) -> Result<u64, QueueError> {
        let workers = self
            .client()
            .hgetall(self.inner.config.workers_key())
            .await?;
        let mut evicted = 0;

        for (worker_id, _registration) in workers {
            let alive = self
                .client()
                .exists(self.inner.config.heartbeat_key(&worker_id))
                .await?;
            if alive {
                continue;
            }

            let assignments = self
                .client()
                .hgetall(self.inner.config.assignments_key())
                .await?;
            for (task_id, json) in assignments {
                let Ok(assignment) = serde_json::from_str::<Assignment>(&json) else {
                    continue;
                };
                if assignment.worker_id != worker_id {
                    continue;
                }
                if let Some(mut task) = self.load_task(&task_id).await? {
                    task.status = TaskStatus::Pending;
                    task.worker_id = None;
                    task.scheduled_at = None;
                    self.enqueue(task, None).await?;
                }
                self.client()
                    .hdel(self.inner.config.assignments_key(), task_id.clone())
                    .await?;
                lock(&self.inner.metrics).on_retry();
                debug!(%task_id, %worker_id, "reassigned task from stale worker");
            }

            self.client()
                .hdel(self.inner.config.workers_key(), worker_id.clone())
                .await?;
            lock(&self.inner.connections).remove(&worker_id);
            common_metrics::inc(EVICTED_WORKERS_COUNTER, &[], 1);
            warn!(%worker_id, "evicted stale worker");
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Live queue status: real sorted-set depths, DLQ depth, metrics
    /// snapshot, registry sizes and connectivity.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let mut queue_depths = HashMap::new();
        for priority in TaskPriority::ALL {
            let depth = self
                .client()
                .zcard(self.inner.config.bucket_key(priority))
                .await?;
            queue_depths.insert(priority.bucket().to_string(), depth);
        }

        let dead_letter_depth = self
            .client()
            .llen(self.inner.config.dead_letter_key())
            .await?;
        let active_workers = self.client().hlen(self.inner.config.workers_key()).await?;
        let total_assignments = self
            .client()
            .hlen(self.inner.config.assignments_key())
            .await?;
        let cache_connected = self.client().ping().await.is_ok();

        for (bucket, depth) in &queue_depths {
            common_metrics::gauge(
                "crawl_queue_depth",
                &[("bucket".to_string(), bucket.clone())],
                *depth as f64,
            );
        }

        Ok(QueueStatus {
            queue_depths,
            dead_letter_depth,
            metrics: lock(&self.inner.metrics).clone(),
            active_workers,
            total_assignments,
            cache_connected,
        })
    }

    /// Push the current metrics snapshot to the bounded metrics list.
    pub async fn collect_metrics(&self) -> Result<QueueMetrics, QueueError> {
        let snapshot = {
            let mut metrics = lock(&self.inner.metrics);
            let previous = lock(&self.inner.last_snapshot);
            metrics.snapshot(previous.as_ref())
        };
        *lock(&self.inner.last_snapshot) = Some(snapshot.clone());

        let key = self.inner.config.metrics_key();
        self.client()
            .lpush(key.clone(), serde_json::to_string(&snapshot)?)
            .await?;
        self.client()
            .ltrim(key, 0, self.inner.config.metrics_history_limit as isize - 1)
            .await?;
        Ok(snapshot)
    }

    /// Current task snapshot from the status hash, if any.
    pub async fn task(&self, task_id: &str) -> Result<Option<QueueTask>, QueueError> {
        self.load_task(task_id).await
    }

    /// Dead-letter snapshots, newest first. Inspection only.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let raw = self
            .client()
            .lrange(self.inner.config.dead_letter_key(), 0, limit as isize - 1)
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("undecodable dead letter entry: {e}"),
            }
        }
        Ok(entries)
    }

    pub(crate) fn worker_load(&self, worker_id: &str) -> u32 {
        lock(&self.inner.connections)
            .get(worker_id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn processing_count(&self) -> u64 {
        lock(&self.inner.metrics).processing_tasks
    }
}
