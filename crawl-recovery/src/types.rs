use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Parsing,
    Auth,
    RateLimit,
    Content,
    System,
    Browser,
    Database,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Content => "content",
            ErrorCategory::System => "system",
            ErrorCategory::Browser => "browser",
            ErrorCategory::Database => "database",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl ErrorSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::High => "high",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::Low => "low",
            ErrorSeverity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    ImmediateRetry,
    DelayedRetry,
    ExponentialBackoff,
    LinearBackoff,
    CircuitBreaker,
    Fallback,
    Skip,
    Escalate,
}

impl RecoveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::ImmediateRetry => "immediate_retry",
            RecoveryStrategy::DelayedRetry => "delayed_retry",
            RecoveryStrategy::ExponentialBackoff => "exponential_backoff",
            RecoveryStrategy::LinearBackoff => "linear_backoff",
            RecoveryStrategy::CircuitBreaker => "circuit_breaker",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RetryTask,
    UseFallback,
    Skip,
    AlertAdmin,
}

impl RecoveryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::RetryTask => "retry_task",
            RecoveryAction::UseFallback => "use_fallback",
            RecoveryAction::Skip => "skip",
            RecoveryAction::AlertAdmin => "alert_admin",
        }
    }
}

/// Caller-supplied context for an error being handled.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub worker_id: Option<String>,
    pub url: Option<String>,
    pub platform: Option<String>,
    pub session_id: Option<String>,
    pub response_status: Option<u16>,
    /// How many retries the task has already burned; the verdict stops
    /// recommending retries past the budget.
    pub attempt: u32,
}

/// Immutable record of one handled error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub task_id: String,
    pub worker_id: Option<String>,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub url: Option<String>,
    pub platform: Option<String>,
    pub session_id: Option<String>,
    pub response_status: Option<u16>,
    pub occurred_at: DateTime<Utc>,
    pub recovery_attempts: u32,
    pub recovery_strategy: Option<RecoveryStrategy>,
    pub recovery_actions: Vec<RecoveryAction>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryMetrics {
    pub total_errors: u64,
    pub errors_by_category: HashMap<String, u64>,
    pub errors_by_severity: HashMap<String, u64>,

    pub total_recoveries: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub recovery_success_rate: f64,

    pub strategy_usage: HashMap<String, u64>,
    pub strategy_success_rate: HashMap<String, f64>,
}

impl RecoveryMetrics {
    pub(crate) fn record(
        &mut self,
        record: &ErrorRecord,
        strategy: RecoveryStrategy,
        recovered: bool,
    ) {
        self.total_errors += 1;
        *self
            .errors_by_category
            .entry(record.category.as_str().to_string())
            .or_insert(0) += 1;
        *self
            .errors_by_severity
            .entry(record.severity.as_str().to_string())
            .or_insert(0) += 1;

        self.total_recoveries += 1;
        if recovered {
            self.successful_recoveries += 1;
        } else {
            self.failed_recoveries += 1;
        }
        self.recovery_success_rate =
            self.successful_recoveries as f64 / self.total_recoveries as f64;

        let key = strategy.as_str().to_string();
        let usage = self.strategy_usage.entry(key.clone()).or_insert(0);
        *usage += 1;
        let rate = self.strategy_success_rate.entry(key).or_insert(0.0);
        // Rolling mean over this strategy's outcomes.
        *rate += (if recovered { 1.0 } else { 0.0 } - *rate) / *usage as f64;
    }
}
