mod breaker;
mod config;
mod manager;
mod patterns;
mod types;

pub use breaker::CircuitBreakerState;
pub use config::RecoveryConfig;
pub use manager::{RecoveryManager, RecoveryVerdict};
pub use patterns::{default_patterns, ErrorPattern};
pub use types::{
    ErrorCategory, ErrorContext, ErrorRecord, ErrorSeverity, RecoveryAction, RecoveryMetrics,
    RecoveryStrategy,
};
