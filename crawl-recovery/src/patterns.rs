use regex::Regex;

use crate::types::{ErrorCategory, ErrorSeverity, RecoveryStrategy};

/// One entry of the ordered pattern library. Patterns are scanned in
/// declaration order; the first regex match classifies the error and carries
/// its retry tuning.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub regex: Regex,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub strategy: RecoveryStrategy,
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub backoff_factor: f64,
    pub timeout_multiplier: f64,
    pub description: &'static str,
}

impl ErrorPattern {
    #[allow(clippy::too_many_arguments)]
    fn new(
        pattern: &str,
        category: ErrorCategory,
        severity: ErrorSeverity,
        strategy: RecoveryStrategy,
        max_retries: u32,
        base_delay_secs: f64,
        backoff_factor: f64,
        timeout_multiplier: f64,
        description: &'static str,
    ) -> Self {
        Self {
            regex: Regex::new(&format!("(?i){pattern}")).expect("invalid error pattern regex"),
            category,
            severity,
            strategy,
            max_retries,
            base_delay_secs,
            backoff_factor,
            timeout_multiplier,
            description,
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        self.regex.is_match(message)
    }
}

/// The built-in library, ordered most-specific first within each family.
pub fn default_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern::new(
            r"(connection|network|socket|dns).*error",
            ErrorCategory::Network,
            ErrorSeverity::High,
            RecoveryStrategy::ExponentialBackoff,
            5,
            2.0,
            2.0,
            1.5,
            "network connectivity failure",
        ),
        ErrorPattern::new(
            r"(timeout|timed out|time out)",
            ErrorCategory::Timeout,
            ErrorSeverity::Medium,
            RecoveryStrategy::LinearBackoff,
            3,
            5.0,
            2.0,
            2.0,
            "request timed out",
        ),
        ErrorPattern::new(
            r"(rate limit|too many requests|429)",
            ErrorCategory::RateLimit,
            ErrorSeverity::Medium,
            RecoveryStrategy::ExponentialBackoff,
            10,
            60.0,
            1.5,
            1.0,
            "upstream rate limiting",
        ),
        ErrorPattern::new(
            r"(auth|unauthorized|forbidden|401|403)",
            ErrorCategory::Auth,
            ErrorSeverity::High,
            RecoveryStrategy::Fallback,
            1,
            1.0,
            2.0,
            1.0,
            "authentication or authorization failure",
        ),
        ErrorPattern::new(
            r"(parse|parsing|json|xml|html).*error",
            ErrorCategory::Parsing,
            ErrorSeverity::Medium,
            RecoveryStrategy::Fallback,
            2,
            1.0,
            2.0,
            1.0,
            "content could not be parsed",
        ),
        ErrorPattern::new(
            r"(browser|chrome|playwright|selenium).*error",
            ErrorCategory::Browser,
            ErrorSeverity::High,
            RecoveryStrategy::CircuitBreaker,
            3,
            2.0,
            2.0,
            1.5,
            "browser automation failure",
        ),
        ErrorPattern::new(
            r"(database|mongodb|redis|sql).*error",
            ErrorCategory::Database,
            ErrorSeverity::Critical,
            RecoveryStrategy::ExponentialBackoff,
            5,
            1.0,
            2.0,
            1.0,
            "backing store failure",
        ),
        ErrorPattern::new(
            r"(memory|disk|cpu|system).*error",
            ErrorCategory::System,
            ErrorSeverity::Critical,
            RecoveryStrategy::Escalate,
            1,
            1.0,
            2.0,
            1.0,
            "system resource exhaustion",
        ),
    ]
}
