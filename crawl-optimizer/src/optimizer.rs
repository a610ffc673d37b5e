use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::{OptimizerConfig, ScalingTrigger};
use crate::snapshot::{PoolSnapshot, SystemSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ScaleUp,
    ScaleDown,
    Rebalance,
    Cleanup,
}

/// A recommendation produced by an optimization tick. The optimizer only
/// recommends and records; execution belongs to the worker manager.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationAction {
    pub action_type: ActionType,
    pub target_workers: usize,
    pub reason: String,
    pub confidence: f64,
    pub estimated_impact: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Baseline {
    pub avg_response_secs: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStats {
    pub baseline_established: bool,
    pub baseline: Option<Baseline>,
    pub system_samples: usize,
    pub pool_samples: usize,
    pub actions_recorded: usize,
    pub last_scaling_action: Option<DateTime<Utc>>,
}

/// Consumes system and pool snapshots and votes on scale-up / scale-down /
/// rebalance / cleanup per the weighted rule set.
pub struct PoolOptimizer {
    config: OptimizerConfig,
    system_history: Mutex<VecDeque<SystemSnapshot>>,
    pool_history: Mutex<VecDeque<PoolSnapshot>>,
    actions: Mutex<VecDeque<OptimizationAction>>,
    baseline: Mutex<Option<Baseline>>,
    last_scaling_action: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PoolOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            system_history: Mutex::new(VecDeque::new()),
            pool_history: Mutex::new(VecDeque::new()),
            actions: Mutex::new(VecDeque::new()),
            baseline: Mutex::new(None),
            last_scaling_action: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Record one monitoring tick. The baseline locks once enough pool
    /// samples have arrived.
    pub fn observe(&self, system: SystemSnapshot, pool: PoolSnapshot) {
        {
            let mut history = lock(&self.system_history);
            history.push_back(system);
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }
        {
            let mut history = lock(&self.pool_history);
            history.push_back(pool);
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }
        self.maybe_establish_baseline();
    }

    fn maybe_establish_baseline(&self) {
        let mut baseline = lock(&self.baseline);
        if baseline.is_some() {
            return;
        }
        let history = lock(&self.pool_history);
        if history.len() < self.config.baseline_samples {
            return;
        }
        let recent: Vec<&PoolSnapshot> =
            history.iter().rev().take(self.config.baseline_samples).collect();
        let n = recent.len() as f64;
        let locked = Baseline {
            avg_response_secs: recent.iter().map(|s| s.avg_response_secs).sum::<f64>() / n,
            throughput: recent.iter().map(|s| s.throughput).sum::<f64>() / n,
            error_rate: recent.iter().map(|s| s.error_rate).sum::<f64>() / n,
            utilization: recent.iter().map(|s| s.utilization).sum::<f64>() / n,
        };
        info!(?locked, "performance baseline established");
        *baseline = Some(locked);
    }

    /// One optimization tick: evaluate the scaling rules on the last three
    /// samples, then the rebalance and cleanup conditions. Actions are
    /// recorded in the bounded history before being returned.
    pub fn optimize(&self, now: DateTime<Utc>) -> Vec<OptimizationAction> {
        if lock(&self.baseline).is_none() {
            self.maybe_establish_baseline();
            return Vec::new();
        }

        let mut actions = Vec::new();
        if let Some(action) = self.evaluate_scaling(now) {
            actions.push(action);
        }
        if let Some(action) = self.evaluate_rebalance(now) {
            actions.push(action);
        }
        if let Some(action) = self.evaluate_cleanup(now) {
            actions.push(action);
        }

        for action in &actions {
            info!(
                action = ?action.action_type,
                target = action.target_workers,
                confidence = action.confidence,
                reason = %action.reason,
                "optimization action recommended"
            );
            if matches!(action.action_type, ActionType::ScaleUp | ActionType::ScaleDown) {
                *lock(&self.last_scaling_action) = Some(now);
            }
        }

        let mut history = lock(&self.actions);
        for action in &actions {
            history.push_back(action.clone());
            while history.len() > self.config.action_history_limit {
                history.pop_front();
            }
        }
        actions
    }

    fn evaluate_scaling(&self, now: DateTime<Utc>) -> Option<OptimizationAction> {
        // Honor the shortest cooldown across enabled rules.
        if let Some(last) = *lock(&self.last_scaling_action) {
            let cooldown = self
                .config
                .scaling_rules
                .iter()
                .filter(|r| r.enabled)
                .map(|r| r.cooldown_secs)
                .min()
                .unwrap_or(0);
            if (now - last).num_seconds() < cooldown as i64 {
                debug!("scaling evaluation skipped: inside cooldown");
                return None;
            }
        }

        let recent: Vec<PoolSnapshot> = {
            let history = lock(&self.pool_history);
            if history.len() < 3 {
                return None;
            }
            history.iter().rev().take(3).cloned().collect()
        };
        let current = &recent[0];
        let last_system = lock(&self.system_history).back().cloned();

        let mut up_votes = 0.0;
        let mut down_votes = 0.0;
        let mut total_weight = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        for rule in self.config.scaling_rules.iter().filter(|r| r.enabled) {
            let Some(value) = rule_value(rule.trigger, current, last_system.as_ref()) else {
                continue;
            };
            total_weight += rule.weight;

            if value > rule.threshold_up {
                up_votes += rule.weight;
                reasons.push(format!(
                    "{}: {:.2} > {:.2}",
                    rule.trigger.as_str(),
                    value,
                    rule.threshold_up
                ));
            } else if value < rule.threshold_down
                && current.total_workers > self.config.min_workers
            {
                down_votes += rule.weight;
                reasons.push(format!(
                    "{}: {:.2} < {:.2}",
                    rule.trigger.as_str(),
                    value,
                    rule.threshold_down
                ));
            }
        }

        if total_weight == 0.0 {
            return None;
        }
        let up_ratio = up_votes / total_weight;
        let down_ratio = down_votes / total_weight;
        let threshold = self.config.strategy.decision_threshold();

        if up_ratio > threshold && current.total_workers < self.config.max_workers {
            let target =
                (current.total_workers + self.config.scaling_step).min(self.config.max_workers);
            return Some(OptimizationAction {
                action_type: ActionType::ScaleUp,
                target_workers: target,
                reason: format!("scale-up votes {:.0}%: {}", up_ratio * 100.0, reasons.join("; ")),
                confidence: up_ratio,
                estimated_impact: HashMap::from([
                    (
                        "throughput_increase".to_string(),
                        0.2 * self.config.scaling_step as f64,
                    ),
                    ("response_time_decrease".to_string(), 0.1),
                    (
                        "resource_cost_increase".to_string(),
                        0.15 * self.config.scaling_step as f64,
                    ),
                ]),
                timestamp: now,
            });
        }

        if down_ratio > threshold {
            let target = current
                .total_workers
                .saturating_sub(self.config.scaling_step)
                .max(self.config.min_workers);
            return Some(OptimizationAction {
                action_type: ActionType::ScaleDown,
                target_workers: target,
                reason: format!(
                    "scale-down votes {:.0}%: {}",
                    down_ratio * 100.0,
                    reasons.join("; ")
                ),
                confidence: down_ratio,
                estimated_impact: HashMap::from([
                    (
                        "resource_cost_decrease".to_string(),
                        0.15 * self.config.scaling_step as f64,
                    ),
                    (
                        "throughput_decrease".to_string(),
                        0.1 * self.config.scaling_step as f64,
                    ),
                    ("response_time_increase".to_string(), 0.05),
                ]),
                timestamp: now,
            });
        }

        None
    }

    /// Load variance above half the mean load means the pool is skewed.
    fn evaluate_rebalance(&self, now: DateTime<Utc>) -> Option<OptimizationAction> {
        let current = lock(&self.pool_history).back().cloned()?;
        let loads = &current.worker_loads;
        if loads.len() < 2 {
            return None;
        }
        let mean = loads.iter().sum::<f64>() / loads.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        let variance =
            loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (loads.len() - 1) as f64;
        if variance <= 0.5 * mean {
            return None;
        }

        Some(OptimizationAction {
            action_type: ActionType::Rebalance,
            target_workers: current.total_workers,
            reason: format!("load skew: variance {variance:.2}, mean {mean:.2}"),
            confidence: (variance / mean).min(1.0),
            estimated_impact: HashMap::from([
                ("load_balance_improvement".to_string(), 0.3),
                ("response_time_decrease".to_string(), 0.1),
            ]),
            timestamp: now,
        })
    }

    fn evaluate_cleanup(&self, now: DateTime<Utc>) -> Option<OptimizationAction> {
        let system = lock(&self.system_history).back().cloned()?;
        if system.memory_usage <= self.config.cleanup_memory_threshold {
            return None;
        }
        let total_workers = lock(&self.pool_history)
            .back()
            .map(|p| p.total_workers)
            .unwrap_or(0);

        Some(OptimizationAction {
            action_type: ActionType::Cleanup,
            target_workers: total_workers,
            reason: format!("memory usage {:.0}%", system.memory_usage * 100.0),
            confidence: system.memory_usage,
            estimated_impact: HashMap::from([
                ("memory_usage_decrease".to_string(), 0.1),
                ("performance_improvement".to_string(), 0.05),
            ]),
            timestamp: now,
        })
    }

    /// Drop snapshots and actions older than the retention window. Returns
    /// how many entries went.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::seconds(self.config.history_retention.as_secs() as i64);
        let mut dropped = 0;

        let mut system = lock(&self.system_history);
        while system.front().is_some_and(|s| s.timestamp < cutoff) {
            system.pop_front();
            dropped += 1;
        }
        drop(system);

        let mut pool = lock(&self.pool_history);
        while pool.front().is_some_and(|s| s.timestamp < cutoff) {
            pool.pop_front();
            dropped += 1;
        }
        drop(pool);

        let mut actions = lock(&self.actions);
        while actions.front().is_some_and(|a| a.timestamp < cutoff) {
            actions.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn baseline(&self) -> Option<Baseline> {
        lock(&self.baseline).clone()
    }

    pub fn recent_actions(&self, limit: usize) -> Vec<OptimizationAction> {
        lock(&self.actions).iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> OptimizerStats {
        OptimizerStats {
            baseline_established: lock(&self.baseline).is_some(),
            baseline: lock(&self.baseline).clone(),
            system_samples: lock(&self.system_history).len(),
            pool_samples: lock(&self.pool_history).len(),
            actions_recorded: lock(&self.actions).len(),
            last_scaling_action: *lock(&self.last_scaling_action),
        }
    }
}

fn rule_value(
    trigger: ScalingTrigger,
    pool: &PoolSnapshot,
    system: Option<&SystemSnapshot>,
) -> Option<f64> {
    match trigger {
        ScalingTrigger::QueueLength => Some(pool.queue_depth as f64),
        ScalingTrigger::ResponseTime => Some(pool.avg_response_secs),
        ScalingTrigger::ErrorRate => Some(pool.error_rate),
        ScalingTrigger::Throughput => Some(pool.throughput),
        ScalingTrigger::CpuUsage => system.map(|s| s.cpu_usage),
        ScalingTrigger::MemoryUsage => system.map(|s| s.memory_usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationStrategy;

    fn pool_snapshot(
        total_workers: usize,
        queue_depth: u64,
        avg_response: f64,
        error_rate: f64,
        loads: Vec<f64>,
    ) -> PoolSnapshot {
        PoolSnapshot {
            timestamp: Utc::now(),
            active_workers: loads.iter().filter(|l| **l > 0.0).count(),
            idle_workers: loads.iter().filter(|l| **l == 0.0).count(),
            total_workers,
            queue_depth,
            tasks_completed: 0,
            tasks_failed: 0,
            avg_response_secs: avg_response,
            throughput: 1.0,
            error_rate,
            utilization: 0.5,
            worker_loads: loads,
        }
    }

    fn system_snapshot(cpu: f64, memory: f64) -> SystemSnapshot {
        SystemSnapshot {
            cpu_usage: cpu,
            memory_usage: memory,
            ..SystemSnapshot::empty(Utc::now())
        }
    }

    fn warmed_optimizer(config: OptimizerConfig) -> PoolOptimizer {
        let optimizer = PoolOptimizer::new(config);
        for _ in 0..10 {
            optimizer.observe(
                system_snapshot(0.5, 0.5),
                pool_snapshot(5, 5, 5.0, 0.05, vec![1.0; 5]),
            );
        }
        assert!(optimizer.baseline().is_some());
        optimizer
    }

    #[test]
    fn test_no_actions_before_baseline() {
        let optimizer = PoolOptimizer::new(OptimizerConfig::default());
        optimizer.observe(
            system_snapshot(0.99, 0.99),
            pool_snapshot(5, 500, 100.0, 0.5, vec![9.0, 0.0]),
        );
        assert!(optimizer.optimize(Utc::now()).is_empty());
        assert!(optimizer.baseline().is_none());
    }

    #[test]
    fn test_overload_votes_scale_up() {
        let optimizer = warmed_optimizer(OptimizerConfig::default());
        // Queue, CPU, response time and error rate all above the up
        // thresholds: 4/5 of the weight votes up.
        for _ in 0..3 {
            optimizer.observe(
                system_snapshot(0.9, 0.5),
                pool_snapshot(5, 50, 40.0, 0.2, vec![1.0; 5]),
            );
        }
        let actions = optimizer.optimize(Utc::now());
        let scale = actions
            .iter()
            .find(|a| a.action_type == ActionType::ScaleUp)
            .expect("expected a scale-up action");
        assert_eq!(scale.target_workers, 7);
        assert!(scale.confidence > 0.6);
    }

    #[test]
    fn test_idle_pool_votes_scale_down() {
        let optimizer = warmed_optimizer(OptimizerConfig::default());
        for _ in 0..3 {
            optimizer.observe(
                system_snapshot(0.1, 0.2),
                pool_snapshot(6, 0, 1.0, 0.0, vec![0.0; 6]),
            );
        }
        let actions = optimizer.optimize(Utc::now());
        let scale = actions
            .iter()
            .find(|a| a.action_type == ActionType::ScaleDown)
            .expect("expected a scale-down action");
        assert_eq!(scale.target_workers, 4);
    }

    #[test]
    fn test_scale_down_respects_minimum() {
        let config = OptimizerConfig {
            min_workers: 2,
            ..OptimizerConfig::default()
        };
        let optimizer = warmed_optimizer(config);
        for _ in 0..3 {
            optimizer.observe(
                system_snapshot(0.1, 0.2),
                // Already at the minimum: down votes are suppressed.
                pool_snapshot(2, 0, 1.0, 0.0, vec![0.0, 0.0]),
            );
        }
        let actions = optimizer.optimize(Utc::now());
        assert!(!actions
            .iter()
            .any(|a| a.action_type == ActionType::ScaleDown));
    }

    #[test]
    fn test_cooldown_suppresses_back_to_back_scaling() {
        let optimizer = warmed_optimizer(OptimizerConfig::default());
        for _ in 0..3 {
            optimizer.observe(
                system_snapshot(0.9, 0.5),
                pool_snapshot(5, 50, 40.0, 0.2, vec![1.0; 5]),
            );
        }
        let now = Utc::now();
        let first = optimizer.optimize(now);
        assert!(first
            .iter()
            .any(|a| a.action_type == ActionType::ScaleUp));

        // Thirty seconds later: inside the 60s minimum cooldown.
        let soon = now + chrono::Duration::seconds(30);
        let second = optimizer.optimize(soon);
        assert!(!second
            .iter()
            .any(|a| matches!(a.action_type, ActionType::ScaleUp | ActionType::ScaleDown)));

        // After the cooldown the vote counts again.
        let later = now + chrono::Duration::seconds(61);
        let third = optimizer.optimize(later);
        assert!(third.iter().any(|a| a.action_type == ActionType::ScaleUp));
    }

    #[test]
    fn test_conservative_strategy_needs_more_votes() {
        let config = OptimizerConfig {
            strategy: OptimizationStrategy::Conservative,
            ..OptimizerConfig::default()
        };
        let optimizer = warmed_optimizer(config);
        // Only queue length and response time vote up: 2/5 = 0.4, under the
        // conservative 0.6 threshold.
        for _ in 0..3 {
            optimizer.observe(
                system_snapshot(0.5, 0.5),
                pool_snapshot(5, 50, 40.0, 0.05, vec![1.0; 5]),
            );
        }
        let actions = optimizer.optimize(Utc::now());
        assert!(!actions.iter().any(|a| a.action_type == ActionType::ScaleUp));
    }

    #[test]
    fn test_load_skew_triggers_rebalance() {
        let optimizer = warmed_optimizer(OptimizerConfig::default());
        optimizer.observe(
            system_snapshot(0.5, 0.5),
            pool_snapshot(2, 5, 5.0, 0.05, vec![6.0, 0.0]),
        );
        let actions = optimizer.optimize(Utc::now());
        assert!(actions
            .iter()
            .any(|a| a.action_type == ActionType::Rebalance));
    }

    #[test]
    fn test_memory_pressure_triggers_cleanup() {
        let optimizer = warmed_optimizer(OptimizerConfig::default());
        optimizer.observe(
            system_snapshot(0.5, 0.9),
            pool_snapshot(5, 5, 5.0, 0.05, vec![1.0; 5]),
        );
        let actions = optimizer.optimize(Utc::now());
        assert!(actions.iter().any(|a| a.action_type == ActionType::Cleanup));
    }

    #[test]
    fn test_cleanup_drops_old_history() {
        let optimizer = warmed_optimizer(OptimizerConfig::default());
        let future = Utc::now() + chrono::Duration::hours(25);
        let dropped = optimizer.cleanup(future);
        assert!(dropped >= 10);
        assert_eq!(optimizer.stats().pool_samples, 0);
    }

    #[test]
    fn test_action_history_is_bounded() {
        let config = OptimizerConfig {
            action_history_limit: 3,
            ..OptimizerConfig::default()
        };
        let optimizer = warmed_optimizer(config);
        for i in 0..10 {
            optimizer.observe(
                system_snapshot(0.5, 0.9),
                pool_snapshot(5, 5, 5.0, 0.05, vec![1.0; 5]),
            );
            drop(optimizer.optimize(Utc::now() + chrono::Duration::seconds(i * 200)));
        }
        assert!(optimizer.stats().actions_recorded <= 3);
    }
}
