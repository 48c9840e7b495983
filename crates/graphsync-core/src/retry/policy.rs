use std::time::Duration;

use super::classify::Decision;

/// What the executor does after classifying one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the current outcome to the caller (success, fatal, or exhausted budget).
    Stop,
    /// Replay the request after the given delay (zero for `RetryNow`).
    RetryAfter(Duration),
}

/// Retry budget shared by every call in the process.
///
/// Individual calls may override it via [`crate::OpContext::with_retry_budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub min_backoff: Duration,
    /// Upper bound on backoff delay (also caps server `Retry-After` hints).
    pub max_backoff: Duration,
    /// Upper bound on a single attempt's wire exchange.
    pub per_call_timeout: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(180),
            per_call_timeout: Duration::from_secs(3600),
        }
    }
}

impl RetryBudget {
    /// `min(min_backoff * 2^(attempt-1), max_backoff)`; `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.min_backoff.saturating_mul(exp).min(self.max_backoff)
    }

    /// Decide whether attempt number `attempt` (1-based) gets a successor.
    pub fn decide(&self, attempt: u32, decision: Decision) -> RetryDecision {
        if !decision.is_retry() || attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }
        match decision {
            Decision::NoRetry | Decision::Fatal => RetryDecision::Stop,
            Decision::RetryNow => RetryDecision::RetryAfter(Duration::ZERO),
            Decision::RetryAfter(Some(hint)) => {
                RetryDecision::RetryAfter(hint.min(self.max_backoff))
            }
            Decision::RetryAfter(None) => RetryDecision::RetryAfter(self.backoff(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::Stop => panic!("expected retry"),
        }
    }

    #[test]
    fn no_retry_for_terminal_decisions() {
        let p = RetryBudget::default();
        assert_eq!(p.decide(1, Decision::NoRetry), RetryDecision::Stop);
        assert_eq!(p.decide(1, Decision::Fatal), RetryDecision::Stop);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let p = RetryBudget {
            max_attempts: 20,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            ..RetryBudget::default()
        };
        assert_eq!(delay(p.decide(1, Decision::RetryAfter(None))), Duration::from_millis(100));
        assert_eq!(delay(p.decide(2, Decision::RetryAfter(None))), Duration::from_millis(200));
        assert_eq!(delay(p.decide(3, Decision::RetryAfter(None))), Duration::from_millis(400));
        assert_eq!(delay(p.decide(10, Decision::RetryAfter(None))), p.max_backoff);
        assert_eq!(p.backoff(u32::MAX), p.max_backoff);
    }

    #[test]
    fn retry_now_has_no_delay_but_still_counts() {
        let p = RetryBudget {
            max_attempts: 2,
            ..RetryBudget::default()
        };
        assert_eq!(
            p.decide(1, Decision::RetryNow),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
        assert_eq!(p.decide(2, Decision::RetryNow), RetryDecision::Stop);
    }

    #[test]
    fn server_hint_is_capped() {
        let p = RetryBudget {
            max_backoff: Duration::from_secs(10),
            ..RetryBudget::default()
        };
        let hinted = Decision::RetryAfter(Some(Duration::from_secs(4)));
        assert_eq!(delay(p.decide(1, hinted)), Duration::from_secs(4));
        let huge = Decision::RetryAfter(Some(Duration::from_secs(600)));
        assert_eq!(delay(p.decide(1, huge)), Duration::from_secs(10));
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryBudget {
            max_attempts: 3,
            ..RetryBudget::default()
        };
        assert!(matches!(
            p.decide(1, Decision::RetryAfter(None)),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            p.decide(2, Decision::RetryAfter(None)),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, Decision::RetryAfter(None)), RetryDecision::Stop);
    }
}
