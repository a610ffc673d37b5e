use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crawl_dedup::DedupEngine;
use crawl_optimizer::PoolSnapshot;
use crawl_queue::{PriorityQueue, QueueStatus, TaskPriority};
use crawl_recovery::RecoveryManager;
use crawl_scheduler::Scheduler;

use crate::fetch::Fetcher;
use crate::sink::StorageSink;
use crate::worker::{CrawlWorker, Shared, WorkerSettings};

struct WorkerHandle {
    notify: Arc<Notify>,
    busy: Arc<AtomicBool>,
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub manager_id: String,
    pub running: bool,
    pub worker_count: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
}

/// Owns the pool of fetch loops: spawning, scaling, the immediate-check
/// hook, idle monitoring and graceful shutdown.
pub struct WorkerManager {
    shared: Arc<Shared>,
    manager_id: String,
    token: CancellationToken,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    next_index: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WorkerManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: PriorityQueue,
        scheduler: Arc<Scheduler>,
        engine: Arc<DedupEngine>,
        recovery: Arc<RecoveryManager>,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn StorageSink>,
        settings: WorkerSettings,
    ) -> Self {
        let manager_id = format!("manager_{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            shared: Arc::new(Shared {
                queue,
                scheduler,
                engine,
                recovery,
                fetcher,
                sink,
                settings,
            }),
            manager_id,
            token: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
            next_index: AtomicUsize::new(0),
        }
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    /// Spawn the initial pool.
    pub fn start(&self, worker_count: usize) {
        for _ in 0..worker_count {
            self.spawn_worker();
        }
        info!(
            manager_id = %self.manager_id,
            worker_count, "worker manager started"
        );
    }

    pub fn spawn_worker(&self) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let worker_id = format!("worker_{}_{}", self.manager_id, index);

        let notify = Arc::new(Notify::new());
        let busy = Arc::new(AtomicBool::new(false));
        let token = self.token.child_token();

        let worker = CrawlWorker::new(
            worker_id.clone(),
            self.shared.clone(),
            notify.clone(),
            busy.clone(),
            token.clone(),
        );
        let join = tokio::spawn(worker.run());

        lock(&self.workers).insert(
            worker_id.clone(),
            WorkerHandle {
                notify,
                busy,
                token,
                join: Some(join),
            },
        );
        worker_id
    }

    /// Grow or shrink the pool toward `target`. Shrinking prefers idle
    /// loops; a stopped worker's heartbeat lapses and the queue sweeper
    /// reclaims anything it still held.
    pub async fn scale_to(&self, target: usize) {
        let current = lock(&self.workers).len();
        if target > current {
            for _ in current..target {
                self.spawn_worker();
            }
            info!(manager_id = %self.manager_id, from = current, to = target, "scaled up");
            return;
        }
        if target >= current {
            return;
        }

        let mut to_stop: Vec<String> = {
            let workers = lock(&self.workers);
            let mut idle: Vec<String> = workers
                .iter()
                .filter(|(_, handle)| !handle.busy.load(Ordering::SeqCst))
                .map(|(id, _)| id.clone())
                .collect();
            idle.sort();
            idle.truncate(current - target);
            // Not enough idle workers: stop busy ones too, newest first.
            if idle.len() < current - target {
                let mut rest: Vec<String> = workers
                    .keys()
                    .filter(|id| !idle.contains(id))
                    .cloned()
                    .collect();
                rest.sort();
                rest.reverse();
                idle.extend(rest.into_iter().take(current - target - idle.len()));
            }
            idle
        };
        to_stop.truncate(current - target);

        for worker_id in to_stop {
            self.stop_worker(&worker_id).await;
        }
        info!(manager_id = %self.manager_id, from = current, to = target, "scaled down");
    }

    async fn stop_worker(&self, worker_id: &str) {
        let handle = lock(&self.workers).remove(worker_id);
        let Some(mut handle) = handle else {
            return;
        };
        handle.token.cancel();
        handle.notify.notify_one();
        if let Some(join) = handle.join.take() {
            if tokio::time::timeout(Duration::from_secs(30), join)
                .await
                .is_err()
            {
                warn!(worker_id, "worker did not stop within 30s");
            }
        }
        for orphan in self.shared.scheduler.remove_worker(worker_id) {
            warn!(worker_id, task_id = %orphan, "task orphaned by scale-down, sweeper will reclaim");
        }
    }

    pub fn idle_workers(&self) -> Vec<String> {
        lock(&self.workers)
            .iter()
            .filter(|(_, handle)| !handle.busy.load(Ordering::SeqCst))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Wake every idle loop so submitters don't wait out the poll interval.
    pub fn trigger_immediate_check(&self) -> usize {
        let workers = lock(&self.workers);
        let mut woken = 0;
        for handle in workers.values() {
            if !handle.busy.load(Ordering::SeqCst) {
                handle.notify.notify_one();
                woken += 1;
            }
        }
        woken
    }

    /// Wake the single idle worker the scheduler would pick for this
    /// priority, falling back to a broadcast when it has no preference.
    pub fn wake_for(&self, priority: TaskPriority) -> usize {
        if let Some(worker_id) = self.shared.scheduler.select_worker(priority) {
            let workers = lock(&self.workers);
            if let Some(handle) = workers.get(&worker_id) {
                if !handle.busy.load(Ordering::SeqCst) {
                    handle.notify.notify_one();
                    return 1;
                }
            }
        }
        self.trigger_immediate_check()
    }

    /// 1s idle monitor: nudge idle workers so queued work never waits on
    /// the poll interval.
    pub async fn run_idle_monitor(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    self.trigger_immediate_check();
                }
            }
        }
    }

    /// Stop accepting new tasks and wait for in-flight steps to finish.
    pub async fn stop(&self) {
        info!(manager_id = %self.manager_id, "worker manager stopping");
        self.token.cancel();
        let ids: Vec<String> = lock(&self.workers).keys().cloned().collect();
        for worker_id in ids {
            self.stop_worker(&worker_id).await;
        }
        info!(manager_id = %self.manager_id, "worker manager stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn stats(&self) -> ManagerStats {
        let workers = lock(&self.workers);
        let busy = workers
            .values()
            .filter(|h| h.busy.load(Ordering::SeqCst))
            .count();
        ManagerStats {
            manager_id: self.manager_id.clone(),
            running: self.is_running(),
            worker_count: workers.len(),
            idle_workers: workers.len() - busy,
            busy_workers: busy,
        }
    }

    /// Assemble the optimizer's pool sample from the queue and scheduler
    /// views.
    pub fn pool_snapshot(&self, queue_status: &QueueStatus) -> PoolSnapshot {
        let stats = self.stats();
        let scheduler_stats = self.shared.scheduler.stats();
        let worker_loads: Vec<f64> = self
            .shared
            .scheduler
            .worker_details()
            .values()
            .map(|(_, metrics)| metrics.current_load as f64)
            .collect();

        PoolSnapshot {
            timestamp: Utc::now(),
            active_workers: stats.busy_workers,
            idle_workers: stats.idle_workers,
            total_workers: stats.worker_count,
            queue_depth: queue_status.queue_depths.values().sum(),
            tasks_completed: scheduler_stats.successful_assignments,
            tasks_failed: scheduler_stats.failed_assignments,
            avg_response_secs: queue_status.metrics.avg_processing_time_secs,
            throughput: queue_status.metrics.throughput,
            error_rate: queue_status.metrics.error_rate,
            utilization: scheduler_stats.worker_utilization,
            worker_loads,
        }
    }
}
