use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    Conservative,
    Balanced,
    Aggressive,
}

impl OptimizationStrategy {
    /// Vote ratio a scaling decision must clear.
    pub fn decision_threshold(self) -> f64 {
        match self {
            OptimizationStrategy::Conservative => 0.6,
            OptimizationStrategy::Balanced | OptimizationStrategy::Aggressive => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTrigger {
    QueueLength,
    CpuUsage,
    MemoryUsage,
    ResponseTime,
    ErrorRate,
    Throughput,
}

impl ScalingTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalingTrigger::QueueLength => "queue_length",
            ScalingTrigger::CpuUsage => "cpu_usage",
            ScalingTrigger::MemoryUsage => "memory_usage",
            ScalingTrigger::ResponseTime => "response_time",
            ScalingTrigger::ErrorRate => "error_rate",
            ScalingTrigger::Throughput => "throughput",
        }
    }
}

/// One weighted voting rule: above `threshold_up` votes toward scaling up,
/// below `threshold_down` (with pool above minimum) toward scaling down.
#[derive(Debug, Clone)]
pub struct ScalingRule {
    pub trigger: ScalingTrigger,
    pub threshold_up: f64,
    pub threshold_down: f64,
    pub min_duration_secs: u64,
    pub cooldown_secs: u64,
    pub enabled: bool,
    pub weight: f64,
}

impl ScalingRule {
    pub fn new(
        trigger: ScalingTrigger,
        threshold_up: f64,
        threshold_down: f64,
        min_duration_secs: u64,
        cooldown_secs: u64,
    ) -> Self {
        Self {
            trigger,
            threshold_up,
            threshold_down,
            min_duration_secs,
            cooldown_secs,
            enabled: true,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Workers added or removed per scaling action.
    pub scaling_step: usize,
    pub strategy: OptimizationStrategy,

    pub monitoring_interval: Duration,
    pub optimization_interval: Duration,
    pub cleanup_interval: Duration,

    pub scaling_rules: Vec<ScalingRule>,

    /// Samples kept per history ring.
    pub history_limit: usize,
    pub action_history_limit: usize,
    /// Pool samples required before the baseline locks.
    pub baseline_samples: usize,
    /// Snapshots older than this are dropped during cleanup.
    pub history_retention: Duration,
    /// Memory usage ratio that triggers a cleanup action.
    pub cleanup_memory_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 20,
            scaling_step: 2,
            strategy: OptimizationStrategy::Balanced,
            monitoring_interval: Duration::from_secs(10),
            optimization_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            scaling_rules: vec![
                ScalingRule::new(ScalingTrigger::QueueLength, 10.0, 2.0, 30, 60),
                ScalingRule::new(ScalingTrigger::CpuUsage, 0.8, 0.3, 60, 120),
                ScalingRule::new(ScalingTrigger::MemoryUsage, 0.85, 0.4, 60, 120),
                ScalingRule::new(ScalingTrigger::ResponseTime, 30.0, 10.0, 45, 90),
                ScalingRule::new(ScalingTrigger::ErrorRate, 0.1, 0.02, 30, 60),
            ],
            history_limit: 1000,
            action_history_limit: 500,
            baseline_samples: 10,
            history_retention: Duration::from_secs(24 * 3600),
            cleanup_memory_threshold: 0.85,
        }
    }
}
