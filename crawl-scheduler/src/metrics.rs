use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_PERFORMANCE_SCORE: f64 = 0.1;
pub const MAX_PERFORMANCE_SCORE: f64 = 2.0;

/// Processing time against which a worker's speed factor is measured.
const IDEAL_PROCESSING_SECS: f64 = 10.0;

/// Rolling per-worker metrics, owned by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub worker_id: String,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub average_processing_secs: f64,
    pub current_load: u32,
    pub capacity: u32,
    pub error_rate: f64,
    /// Composite utility score in [0.1, 2.0]; starts neutral at 1.0.
    pub performance_score: f64,
    pub consecutive_failures: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

impl WorkerMetrics {
    pub fn new(worker_id: impl Into<String>, capacity: u32) -> Self {
        Self {
            worker_id: worker_id.into(),
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            average_processing_secs: 0.0,
            current_load: 0,
            capacity: capacity.max(1),
            error_rate: 0.0,
            performance_score: 1.0,
            consecutive_failures: 0,
            last_activity: Some(Utc::now()),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 1.0;
        }
        self.successful_tasks as f64 / self.total_tasks as f64
    }

    pub fn load_ratio(&self) -> f64 {
        self.current_load as f64 / self.capacity.max(1) as f64
    }

    /// Fold one finished task into the rolling metrics and recompute the
    /// performance score.
    pub fn update(&mut self, processing_secs: f64, success: bool) {
        self.total_tasks += 1;
        if success {
            self.successful_tasks += 1;
            self.consecutive_failures = 0;
        } else {
            self.failed_tasks += 1;
            self.consecutive_failures += 1;
        }

        if self.total_tasks == 1 {
            self.average_processing_secs = processing_secs;
        } else {
            self.average_processing_secs = (self.average_processing_secs
                * (self.total_tasks - 1) as f64
                + processing_secs)
                / self.total_tasks as f64;
        }

        self.error_rate = self.failed_tasks as f64 / self.total_tasks as f64;
        self.recompute_score();
        self.last_activity = Some(Utc::now());
    }

    /// success-rate (0.5) + speed (0.3) + headroom (0.2), multiplied by the
    /// consecutive-failure penalty, clamped to [0.1, 2.0].
    fn recompute_score(&mut self) {
        let success_factor = self.success_rate() * 0.5;

        let speed = if self.average_processing_secs > 0.0 {
            (IDEAL_PROCESSING_SECS / self.average_processing_secs).min(2.0)
        } else {
            1.0
        };
        let speed_factor = speed * 0.3;

        let load_factor = (1.0 - self.load_ratio().min(1.0)) * 0.2;

        let penalty = (1.0 - 0.1 * self.consecutive_failures as f64).max(0.0);

        self.performance_score = ((success_factor + speed_factor + load_factor) * penalty)
            .clamp(MIN_PERFORMANCE_SCORE, MAX_PERFORMANCE_SCORE);
    }
}
