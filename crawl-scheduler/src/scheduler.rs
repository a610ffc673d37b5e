use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crawl_queue::TaskPriority;

use crate::config::{SchedulingConfig, SchedulingPolicy};
use crate::metrics::WorkerMetrics;
use crate::types::{HealthState, WorkerState};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulingStats {
    pub total_assignments: u64,
    pub successful_assignments: u64,
    pub failed_assignments: u64,
    pub worker_utilization: f64,
    pub last_rebalance: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RebalanceRecommendation {
    Rebalance { load_variance: f64, load_mean: f64 },
    ScaleUp { utilization: f64, current: usize },
    ScaleDown { utilization: f64, current: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
    pub status: HealthState,
    pub health_score: f64,
    pub total_workers: usize,
    pub failed_workers: usize,
    pub utilization: f64,
    pub queue_backlog: u64,
}

#[derive(Default)]
struct WorkerTable {
    metrics: HashMap<String, WorkerMetrics>,
    states: HashMap<String, WorkerState>,
    stale_flags: HashMap<String, u32>,
    round_robin: usize,
}

#[derive(Default)]
struct AssignmentTable {
    by_task: HashMap<String, String>,
    by_worker: HashMap<String, HashSet<String>>,
}

/// Picks a worker for each task, tracks per-worker performance, and derives
/// rebalance/scale recommendations from live utilization.
///
/// Both map families sit behind their own mutex; critical sections are short
/// and never span I/O.
pub struct Scheduler {
    config: SchedulingConfig,
    workers: Mutex<WorkerTable>,
    assignments: Mutex<AssignmentTable>,
    stats: Mutex<SchedulingStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Scheduler {
    pub fn new(config: SchedulingConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(WorkerTable::default()),
            assignments: Mutex::new(AssignmentTable::default()),
            stats: Mutex::new(SchedulingStats::default()),
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn register_worker(&self, worker_id: &str, capacity: u32) {
        let mut workers = lock(&self.workers);
        workers
            .metrics
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerMetrics::new(worker_id, capacity));
        workers
            .states
            .entry(worker_id.to_string())
            .or_insert(WorkerState::Idle);
        debug!(worker_id, capacity, "worker registered with scheduler");
    }

    pub fn remove_worker(&self, worker_id: &str) -> Vec<String> {
        {
            let mut workers = lock(&self.workers);
            workers.metrics.remove(worker_id);
            workers.states.remove(worker_id);
            workers.stale_flags.remove(worker_id);
        }
        let mut assignments = lock(&self.assignments);
        let orphaned: Vec<String> = assignments
            .by_worker
            .remove(worker_id)
            .map(|tasks| tasks.into_iter().collect())
            .unwrap_or_default();
        for task_id in &orphaned {
            assignments.by_task.remove(task_id);
        }
        if !orphaned.is_empty() {
            warn!(worker_id, count = orphaned.len(), "removed worker had tasks in flight");
        }
        orphaned
    }

    /// Pick a worker for a task of the given priority under the active
    /// policy. Returns None when no assignable worker has headroom; the task
    /// then stays in its source queue.
    pub fn select_worker(&self, priority: TaskPriority) -> Option<String> {
        let mut workers = lock(&self.workers);

        let candidates: Vec<(String, f64, u32, f64, f64, u32)> = workers
            .metrics
            .iter()
            .filter(|(id, metrics)| {
                workers
                    .states
                    .get(*id)
                    .is_some_and(|state| state.is_assignable())
                    && metrics.current_load < metrics.capacity
            })
            .map(|(id, m)| {
                (
                    id.clone(),
                    m.performance_score,
                    m.current_load,
                    m.load_ratio(),
                    m.success_rate(),
                    m.consecutive_failures,
                )
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let selected = match self.config.policy {
            SchedulingPolicy::RoundRobin => {
                let index = workers.round_robin % candidates.len();
                workers.round_robin = workers.round_robin.wrapping_add(1);
                let mut sorted = candidates;
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                sorted[index].0.clone()
            }
            SchedulingPolicy::LeastLoaded => {
                candidates
                    .iter()
                    .min_by_key(|(_, _, load, _, _, _)| *load)
                    .map(|(id, ..)| id.clone())
                    .expect("candidates checked non-empty")
            }
            SchedulingPolicy::PerformanceBased => {
                candidates
                    .iter()
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(id, ..)| id.clone())
                    .expect("candidates checked non-empty")
            }
            SchedulingPolicy::Intelligent => {
                let priority_weight = self
                    .config
                    .priority_weights
                    .get(&priority)
                    .copied()
                    .unwrap_or(0.6);
                let mut best: Option<(String, f64)> = None;
                for (id, perf, _load, load_ratio, success_rate, consecutive) in &candidates {
                    let mut score = perf * 0.4
                        + (1.0 - load_ratio) * 0.3
                        + priority_weight * 0.2
                        + success_rate * 0.1;
                    score *= 1.0 - (*consecutive as f64 * 0.1).min(0.5);
                    match &best {
                        Some((_, best_score)) if score <= *best_score => {}
                        _ => best = Some((id.clone(), score)),
                    }
                }
                best.map(|(id, _)| id).expect("candidates checked non-empty")
            }
        };

        Some(selected)
    }

    /// Record an assignment made from a `select_worker` pick.
    pub fn assign(&self, task_id: &str, worker_id: &str) {
        {
            let mut assignments = lock(&self.assignments);
            assignments
                .by_task
                .insert(task_id.to_string(), worker_id.to_string());
            assignments
                .by_worker
                .entry(worker_id.to_string())
                .or_default()
                .insert(task_id.to_string());
        }
        let mut workers = lock(&self.workers);
        if let Some(metrics) = workers.metrics.get_mut(worker_id) {
            metrics.current_load += 1;
            let next = derive_state(metrics, self.config.consecutive_failure_limit);
            update_state(&mut workers.states, worker_id, next);
        }
        lock(&self.stats).total_assignments += 1;
        debug!(task_id, worker_id, "task assigned");
    }

    /// Fold a completed (or failed) task back into the worker's metrics.
    pub fn task_completed(
        &self,
        task_id: &str,
        worker_id: &str,
        success: bool,
        processing_secs: f64,
    ) {
        {
            let mut assignments = lock(&self.assignments);
            assignments.by_task.remove(task_id);
            if let Some(tasks) = assignments.by_worker.get_mut(worker_id) {
                tasks.remove(task_id);
            }
        }

        let mut workers = lock(&self.workers);
        if let Some(metrics) = workers.metrics.get_mut(worker_id) {
            metrics.update(processing_secs, success);
            metrics.current_load = metrics.current_load.saturating_sub(1);
            let next = derive_state(metrics, self.config.consecutive_failure_limit);
            update_state(&mut workers.states, worker_id, next);
        }
        drop(workers);

        let mut stats = lock(&self.stats);
        if success {
            stats.successful_assignments += 1;
        } else {
            stats.failed_assignments += 1;
        }
        drop(stats);
        self.refresh_utilization();
    }

    /// Clear a FAILED (or MAINTENANCE) worker back to IDLE after an operator
    /// or health-check reset.
    pub fn reset_worker(&self, worker_id: &str) {
        let mut workers = lock(&self.workers);
        if let Some(metrics) = workers.metrics.get_mut(worker_id) {
            metrics.consecutive_failures = 0;
        }
        workers.stale_flags.remove(worker_id);
        update_state(&mut workers.states, worker_id, WorkerState::Idle);
        info!(worker_id, "worker reset to idle");
    }

    /// Flag workers that have been inactive past the idle timeout; repeat
    /// offenders go to MAINTENANCE.
    pub fn check_worker_health(&self, now: DateTime<Utc>) {
        let mut workers = lock(&self.workers);
        let stale: Vec<String> = workers
            .metrics
            .iter()
            .filter(|(_, m)| {
                m.last_activity
                    .is_some_and(|at| (now - at).num_seconds() > self.config.idle_timeout_secs)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for worker_id in stale {
            let flags = workers.stale_flags.entry(worker_id.clone()).or_insert(0);
            *flags += 1;
            warn!(%worker_id, flags = *flags, "worker idle past timeout");
            if *flags >= self.config.stale_flags_for_maintenance {
                update_state(&mut workers.states, &worker_id, WorkerState::Maintenance);
            }
        }
    }

    fn refresh_utilization(&self) {
        let utilization = self.utilization();
        lock(&self.stats).worker_utilization = utilization;
    }

    pub fn utilization(&self) -> f64 {
        let workers = lock(&self.workers);
        let capacity: u32 = workers.metrics.values().map(|m| m.capacity).sum();
        if capacity == 0 {
            return 0.0;
        }
        let load: u32 = workers.metrics.values().map(|m| m.current_load).sum();
        load as f64 / capacity as f64
    }

    /// Periodic rebalance evaluation: load skew, then pool sizing.
    pub fn evaluate_rebalance(&self) -> Vec<RebalanceRecommendation> {
        let mut recommendations = Vec::new();
        let (loads, worker_count) = {
            let workers = lock(&self.workers);
            let loads: Vec<f64> = workers
                .metrics
                .values()
                .map(|m| m.current_load as f64)
                .collect();
            (loads, workers.metrics.len())
        };

        if loads.len() >= 2 {
            let mean = loads.iter().sum::<f64>() / loads.len() as f64;
            let variance = loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>()
                / (loads.len() - 1) as f64;
            if mean > 0.0 && variance > 0.5 * mean {
                recommendations.push(RebalanceRecommendation::Rebalance {
                    load_variance: variance,
                    load_mean: mean,
                });
            }
        }

        let utilization = self.utilization();
        if utilization > self.config.scale_up_threshold && worker_count < self.config.max_workers {
            recommendations.push(RebalanceRecommendation::ScaleUp {
                utilization,
                current: worker_count,
            });
        } else if utilization < self.config.scale_down_threshold
            && worker_count > self.config.min_workers
        {
            recommendations.push(RebalanceRecommendation::ScaleDown {
                utilization,
                current: worker_count,
            });
        }

        if !recommendations.is_empty() {
            lock(&self.stats).last_rebalance = Some(Utc::now());
        }
        recommendations
    }

    /// Health score per the operational surface: worker-failure ratio, queue
    /// backlog over 100, utilization over 0.9.
    pub fn health_check(&self, queue_backlog: u64) -> SchedulerHealth {
        let (total, failed) = {
            let workers = lock(&self.workers);
            let total = workers.states.len();
            let failed = workers
                .states
                .values()
                .filter(|s| **s == WorkerState::Failed)
                .count();
            (total, failed)
        };
        let utilization = self.utilization();

        let mut score: f64 = 1.0;
        if total > 0 {
            score *= 1.0 - failed as f64 / total as f64;
        }
        if queue_backlog > 100 {
            score *= (1.0 - (queue_backlog - 100) as f64 / 1000.0).max(0.5);
        }
        if utilization > 0.9 {
            score *= (2.0 - utilization * 2.0).max(0.6);
        }

        let status = if score >= 0.8 {
            HealthState::Healthy
        } else if score >= 0.5 {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        };

        SchedulerHealth {
            status,
            health_score: score,
            total_workers: total,
            failed_workers: failed,
            utilization,
            queue_backlog,
        }
    }

    pub fn stats(&self) -> SchedulingStats {
        let mut stats = lock(&self.stats).clone();
        stats.worker_utilization = self.utilization();
        stats
    }

    pub fn worker_state(&self, worker_id: &str) -> Option<WorkerState> {
        lock(&self.workers).states.get(worker_id).copied()
    }

    pub fn worker_metrics(&self, worker_id: &str) -> Option<WorkerMetrics> {
        lock(&self.workers).metrics.get(worker_id).cloned()
    }

    pub fn worker_details(&self) -> HashMap<String, (WorkerState, WorkerMetrics)> {
        let workers = lock(&self.workers);
        workers
            .metrics
            .iter()
            .map(|(id, metrics)| {
                let state = workers
                    .states
                    .get(id)
                    .copied()
                    .unwrap_or(WorkerState::Idle);
                (id.clone(), (state, metrics.clone()))
            })
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).metrics.len()
    }

    pub fn assignment_count(&self) -> usize {
        lock(&self.assignments).by_task.len()
    }

    pub fn assigned_worker(&self, task_id: &str) -> Option<String> {
        lock(&self.assignments).by_task.get(task_id).cloned()
    }
}

/// Worker state as a pure function of load and failure run. FAILED and
/// MAINTENANCE are sticky and only cleared through `reset_worker`.
fn derive_state(metrics: &WorkerMetrics, failure_limit: u32) -> WorkerState {
    if metrics.consecutive_failures >= failure_limit {
        WorkerState::Failed
    } else if metrics.current_load >= metrics.capacity {
        WorkerState::Overloaded
    } else if metrics.current_load > 0 {
        WorkerState::Busy
    } else {
        WorkerState::Idle
    }
}

fn update_state(states: &mut HashMap<String, WorkerState>, worker_id: &str, next: WorkerState) {
    let current = states.get(worker_id).copied();
    match current {
        // Sticky states hold until an explicit reset (or a re-derived
        // FAILED, which is a no-op refresh).
        Some(WorkerState::Failed) | Some(WorkerState::Maintenance)
            if !matches!(next, WorkerState::Failed | WorkerState::Idle) => {}
        _ => {
            states.insert(worker_id.to_string(), next);
        }
    }
}
