#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_retry_attempts: u32,
    /// Base delay in seconds for the retry strategies.
    pub base_retry_delay_secs: f64,
    pub max_retry_delay_secs: f64,

    pub exponential_base: f64,
    pub linear_increment_secs: f64,
    pub jitter_enabled: bool,
    pub jitter_factor: f64,

    /// Consecutive failures that open a circuit breaker.
    pub circuit_breaker_threshold: u32,
    /// How long an open breaker blocks before admitting a half-open trial.
    pub circuit_breaker_timeout_secs: f64,

    /// Bound on the in-memory error-record ring.
    pub max_error_records: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            base_retry_delay_secs: 1.0,
            max_retry_delay_secs: 300.0,
            exponential_base: 2.0,
            linear_increment_secs: 1.0,
            jitter_enabled: true,
            jitter_factor: 0.1,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60.0,
            max_error_records: 10_000,
        }
    }
}
