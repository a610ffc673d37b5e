use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::breaker::{BreakerDecision, CircuitBreakerState};
use crate::config::RecoveryConfig;
use crate::patterns::{default_patterns, ErrorPattern};
use crate::types::{
    ErrorCategory, ErrorContext, ErrorRecord, ErrorSeverity, RecoveryAction, RecoveryMetrics,
    RecoveryStrategy,
};

const ERRORS_COUNTER: &str = "crawl_recovery_errors_total";
const ALERTS_COUNTER: &str = "crawl_recovery_alerts_total";

/// What the recovery engine recommends for a failed task. The queue owns
/// retry scheduling; this is advice, not an action.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryVerdict {
    pub should_retry: bool,
    pub action: RecoveryAction,
    /// Suggested delay before the retry, when `should_retry`.
    pub delay: Option<Duration>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub strategy: RecoveryStrategy,
    pub error_id: String,
}

pub struct RecoveryManager {
    config: RecoveryConfig,
    patterns: Vec<ErrorPattern>,
    breakers: Mutex<HashMap<String, CircuitBreakerState>>,
    records: Mutex<VecDeque<ErrorRecord>>,
    metrics: Mutex<RecoveryMetrics>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            patterns: default_patterns(),
            breakers: Mutex::new(HashMap::new()),
            records: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(RecoveryMetrics::default()),
        }
    }

    /// Prepend a custom pattern; it is consulted before the built-in
    /// library.
    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.patterns.insert(0, pattern);
    }

    /// Classify an error, consult the circuit breaker, pick a strategy and
    /// return the verdict.
    pub fn handle_error(
        &self,
        task_id: &str,
        message: &str,
        context: &ErrorContext,
    ) -> RecoveryVerdict {
        self.handle_error_at(Utc::now(), task_id, message, context)
    }

    /// Clock-explicit variant, used directly by the breaker-timing tests.
    pub fn handle_error_at(
        &self,
        now: DateTime<Utc>,
        task_id: &str,
        message: &str,
        context: &ErrorContext,
    ) -> RecoveryVerdict {
        let matched = self.patterns.iter().find(|p| p.matches(message));
        let (category, severity) = classify(matched, message, context);

        let mut record = ErrorRecord {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            worker_id: context.worker_id.clone(),
            message: message.to_string(),
            category,
            severity,
            url: context.url.clone(),
            platform: context.platform.clone(),
            session_id: context.session_id.clone(),
            response_status: context.response_status,
            occurred_at: now,
            recovery_attempts: context.attempt,
            recovery_strategy: None,
            recovery_actions: Vec::new(),
        };

        let strategy = matched.map(|p| p.strategy).unwrap_or_else(|| {
            default_strategy(category, severity)
        });
        record.recovery_strategy = Some(strategy);

        // Circuit breaker gate, keyed by URL host -> platform -> "default".
        let breaker_key = breaker_key(context);
        let decision = {
            let mut breakers = lock(&self.breakers);
            breakers.entry(breaker_key.clone()).or_default().on_failure(
                now,
                self.config.circuit_breaker_threshold,
                self.config.circuit_breaker_timeout_secs,
            )
        };

        let (should_retry, action, delay) = match decision {
            BreakerDecision::Blocked => {
                debug!(task_id, %breaker_key, "circuit breaker open, skipping");
                (false, RecoveryAction::Skip, None)
            }
            BreakerDecision::Proceed { just_opened: true } => {
                warn!(task_id, %breaker_key, "circuit breaker opened");
                (false, RecoveryAction::Skip, None)
            }
            BreakerDecision::HalfOpenTrial | BreakerDecision::Proceed { just_opened: false } => {
                self.execute_strategy(strategy, matched, &record, context)
            }
        };

        record.recovery_actions.push(action);

        let recovered = matches!(
            action,
            RecoveryAction::RetryTask | RecoveryAction::UseFallback
        );
        lock(&self.metrics).record(&record, strategy, recovered);
        common_metrics::inc(
            ERRORS_COUNTER,
            &[
                ("category".to_string(), category.as_str().to_string()),
                ("severity".to_string(), severity.as_str().to_string()),
            ],
            1,
        );

        let error_id = record.id.clone();
        self.store_record(record);

        RecoveryVerdict {
            should_retry,
            action,
            delay,
            category,
            severity,
            strategy,
            error_id,
        }
    }

    fn execute_strategy(
        &self,
        strategy: RecoveryStrategy,
        matched: Option<&ErrorPattern>,
        record: &ErrorRecord,
        context: &ErrorContext,
    ) -> (bool, RecoveryAction, Option<Duration>) {
        let max_retries = matched
            .map(|p| p.max_retries)
            .unwrap_or(self.config.max_retry_attempts);
        let base = matched
            .map(|p| p.base_delay_secs)
            .unwrap_or(self.config.base_retry_delay_secs);
        let factor = matched
            .map(|p| p.backoff_factor)
            .unwrap_or(self.config.exponential_base);

        match strategy {
            RecoveryStrategy::ImmediateRetry
            | RecoveryStrategy::DelayedRetry
            | RecoveryStrategy::ExponentialBackoff
            | RecoveryStrategy::LinearBackoff
            | RecoveryStrategy::CircuitBreaker => {
                if context.attempt >= max_retries {
                    debug!(
                        task_id = %record.task_id,
                        attempt = context.attempt,
                        "retry budget exhausted, recommending fallback"
                    );
                    return (false, RecoveryAction::UseFallback, None);
                }
                let secs = match strategy {
                    RecoveryStrategy::ImmediateRetry => 0.0,
                    RecoveryStrategy::DelayedRetry | RecoveryStrategy::CircuitBreaker => base,
                    RecoveryStrategy::ExponentialBackoff => {
                        base * factor.powi(context.attempt as i32)
                    }
                    RecoveryStrategy::LinearBackoff => {
                        base + self.config.linear_increment_secs * context.attempt as f64
                    }
                    _ => unreachable!(),
                };
                let secs = self.apply_jitter(secs.min(self.config.max_retry_delay_secs));
                (
                    true,
                    RecoveryAction::RetryTask,
                    Some(Duration::from_secs_f64(secs.max(0.0))),
                )
            }
            RecoveryStrategy::Fallback => (false, RecoveryAction::UseFallback, None),
            RecoveryStrategy::Skip => (false, RecoveryAction::Skip, None),
            RecoveryStrategy::Escalate => {
                self.send_alert(record);
                (false, RecoveryAction::AlertAdmin, None)
            }
        }
    }

    fn apply_jitter(&self, secs: f64) -> f64 {
        if !self.config.jitter_enabled || secs == 0.0 {
            return secs;
        }
        let jitter = rand::thread_rng()
            .gen_range(-self.config.jitter_factor..=self.config.jitter_factor);
        secs * (1.0 + jitter)
    }

    fn send_alert(&self, record: &ErrorRecord) {
        error!(
            task_id = %record.task_id,
            category = record.category.as_str(),
            severity = record.severity.as_str(),
            attempts = record.recovery_attempts,
            "escalating error to operators: {}",
            record.message
        );
        common_metrics::inc(
            ALERTS_COUNTER,
            &[("category".to_string(), record.category.as_str().to_string())],
            1,
        );
    }

    fn store_record(&self, record: ErrorRecord) {
        let mut records = lock(&self.records);
        records.push_back(record);
        while records.len() > self.config.max_error_records {
            records.pop_front();
        }
    }

    /// A successful request for the breaker key closes its breaker.
    pub fn record_success(&self, url: Option<&str>, platform: Option<&str>) {
        let context = ErrorContext {
            url: url.map(str::to_string),
            platform: platform.map(str::to_string),
            ..ErrorContext::default()
        };
        let key = breaker_key(&context);
        if let Some(breaker) = lock(&self.breakers).get_mut(&key) {
            breaker.on_success();
        }
    }

    pub fn breaker(&self, key: &str) -> Option<CircuitBreakerState> {
        lock(&self.breakers).get(key).cloned()
    }

    pub fn breakers(&self) -> HashMap<String, CircuitBreakerState> {
        lock(&self.breakers).clone()
    }

    /// Reset one breaker, or all of them when `key` is None.
    pub fn reset_breaker(&self, key: Option<&str>) {
        let mut breakers = lock(&self.breakers);
        match key {
            Some(key) => {
                breakers.insert(key.to_string(), CircuitBreakerState::default());
            }
            None => breakers.clear(),
        }
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        lock(&self.metrics).clone()
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let records = lock(&self.records);
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn errors_for_task(&self, task_id: &str) -> Vec<ErrorRecord> {
        lock(&self.records)
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }
}

fn classify(
    matched: Option<&ErrorPattern>,
    _message: &str,
    context: &ErrorContext,
) -> (ErrorCategory, ErrorSeverity) {
    let mut category = matched.map(|p| p.category).unwrap_or(ErrorCategory::Unknown);
    let mut severity = matched.map(|p| p.severity).unwrap_or(ErrorSeverity::Medium);

    // HTTP status overrides pattern classification.
    if let Some(status) = context.response_status {
        match status {
            401 | 403 => {
                category = ErrorCategory::Auth;
                severity = ErrorSeverity::High;
            }
            429 => {
                category = ErrorCategory::RateLimit;
                severity = ErrorSeverity::Medium;
            }
            500.. => {
                category = ErrorCategory::System;
                severity = ErrorSeverity::High;
            }
            400.. => {
                category = ErrorCategory::Content;
                severity = ErrorSeverity::Low;
            }
            _ => {}
        }
    }
    (category, severity)
}

fn default_strategy(category: ErrorCategory, severity: ErrorSeverity) -> RecoveryStrategy {
    if severity == ErrorSeverity::Critical {
        return RecoveryStrategy::Escalate;
    }
    match category {
        ErrorCategory::Network | ErrorCategory::RateLimit => RecoveryStrategy::ExponentialBackoff,
        ErrorCategory::Timeout => RecoveryStrategy::LinearBackoff,
        ErrorCategory::Auth | ErrorCategory::Parsing => RecoveryStrategy::Fallback,
        _ => RecoveryStrategy::DelayedRetry,
    }
}

/// URL host, then platform, then "default".
fn breaker_key(context: &ErrorContext) -> String {
    if let Some(url) = &context.url {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                return host.to_string();
            }
        }
    }
    match &context.platform {
        Some(platform) if !platform.is_empty() => platform.clone(),
        _ => "default".to_string(),
    }
}
