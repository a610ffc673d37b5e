use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-key circuit breaker state. Keys are URL hosts, falling back to the
/// platform tag, falling back to `"default"`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

pub(crate) enum BreakerDecision {
    /// The breaker is open and the cool-down has not elapsed.
    Blocked,
    /// The cool-down elapsed; one trial request is admitted.
    HalfOpenTrial,
    /// Closed (possibly just opened by this failure).
    Proceed { just_opened: bool },
}

impl CircuitBreakerState {
    /// Account for a failure at `now` and decide whether the caller may
    /// proceed. Opening happens when the failure count reaches `threshold`;
    /// the failure that opens the breaker is itself blocked.
    pub(crate) fn on_failure(
        &mut self,
        now: DateTime<Utc>,
        threshold: u32,
        timeout_secs: f64,
    ) -> BreakerDecision {
        if self.is_open {
            match self.next_attempt_time {
                Some(at) if now < at => return BreakerDecision::Blocked,
                _ => {
                    // Half-open: one trial allowed. The counter stays at the
                    // threshold so the next failure re-opens with a fresh
                    // timer.
                    self.is_open = false;
                    return BreakerDecision::HalfOpenTrial;
                }
            }
        }

        self.failure_count += 1;
        self.total_requests += 1;
        self.last_failure_time = Some(now);

        if self.failure_count >= threshold {
            self.is_open = true;
            self.next_attempt_time =
                Some(now + chrono::Duration::milliseconds((timeout_secs * 1000.0) as i64));
            return BreakerDecision::Proceed { just_opened: true };
        }
        BreakerDecision::Proceed { just_opened: false }
    }

    /// A successful request closes the breaker and clears the failure run.
    pub(crate) fn on_success(&mut self) {
        self.is_open = false;
        self.failure_count = 0;
        self.success_count += 1;
        self.total_requests += 1;
        self.next_attempt_time = None;
    }

    pub fn blocks_at(&self, now: DateTime<Utc>) -> bool {
        self.is_open && matches!(self.next_attempt_time, Some(at) if now < at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold_and_blocks() {
        let mut breaker = CircuitBreakerState::default();
        let now = Utc::now();

        for _ in 0..4 {
            assert!(matches!(
                breaker.on_failure(now, 5, 60.0),
                BreakerDecision::Proceed { just_opened: false }
            ));
        }
        assert!(matches!(
            breaker.on_failure(now, 5, 60.0),
            BreakerDecision::Proceed { just_opened: true }
        ));
        assert!(breaker.is_open);
        assert!(breaker.blocks_at(now + chrono::Duration::seconds(59)));
        assert!(!breaker.blocks_at(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_half_open_then_reopen_with_fresh_timer() {
        let mut breaker = CircuitBreakerState::default();
        let opened_at = Utc::now();
        for _ in 0..5 {
            breaker.on_failure(opened_at, 5, 60.0);
        }
        assert!(breaker.is_open);

        // Before the window: blocked.
        let early = opened_at + chrono::Duration::seconds(59);
        assert!(matches!(
            breaker.on_failure(early, 5, 60.0),
            BreakerDecision::Blocked
        ));

        // After the window: one trial admitted.
        let late = opened_at + chrono::Duration::seconds(61);
        assert!(matches!(
            breaker.on_failure(late, 5, 60.0),
            BreakerDecision::HalfOpenTrial
        ));
        assert!(!breaker.is_open);

        // The trial failing re-opens with a timer anchored at the new
        // failure.
        assert!(matches!(
            breaker.on_failure(late, 5, 60.0),
            BreakerDecision::Proceed { just_opened: true }
        ));
        assert!(breaker.is_open);
        assert!(breaker.blocks_at(late + chrono::Duration::seconds(59)));
        assert!(!breaker.blocks_at(late + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_success_closes_and_resets() {
        let mut breaker = CircuitBreakerState::default();
        let now = Utc::now();
        for _ in 0..5 {
            breaker.on_failure(now, 5, 60.0);
        }
        assert!(breaker.is_open);

        breaker.on_success();
        assert!(!breaker.is_open);
        assert_eq!(breaker.failure_count, 0);
        assert_eq!(breaker.success_count, 1);

        // A fresh failure run is needed to open again.
        assert!(matches!(
            breaker.on_failure(now, 5, 60.0),
            BreakerDecision::Proceed { just_opened: false }
        ));
    }
}
