//! Retry and backoff decisions.
//!
//! `RetryPolicy::decide` is a pure function of the error class, the unit's
//! failure counters and a jitter sample in `[0, 1)`. The caller owns the
//! randomness so the decision can be tested exactly.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::TranslateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the unit after this delay.
    Retry(Duration),
    /// Mark the unit FailedPermanent.
    GiveUp,
    /// Abort the whole run.
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// The unit gives up on its `max_retries`-th transient failure.
    pub max_retries: u32,
    /// The unit gives up on its `max_rate_limit_retries`-th throttled call.
    pub max_rate_limit_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_rate_limit_retries: 10,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(60),
            jitter_ratio: 0.25,
        }
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_rate_limit_retries: config.max_rate_limit_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl RetryPolicy {
    /// Decide what happens after `error`.
    ///
    /// `transient_failures` and `throttled` are the unit's counters *including*
    /// this failure.
    pub fn decide(
        &self,
        error: &TranslateError,
        transient_failures: u32,
        throttled: u32,
        jitter: f64,
    ) -> RetryDecision {
        match error {
            TranslateError::Authentication(_) => RetryDecision::Fatal,
            TranslateError::InvalidRequest(_) => RetryDecision::GiveUp,
            TranslateError::Transient(_) => {
                if transient_failures >= self.max_retries {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::Retry(self.backoff(transient_failures, jitter))
                }
            }
            TranslateError::RateLimited { retry_after } => {
                if throttled >= self.max_rate_limit_retries {
                    return RetryDecision::GiveUp;
                }
                let backoff = self.backoff(throttled, jitter);
                let delay = match retry_after {
                    Some(hint) => backoff.max(*hint),
                    None => backoff,
                };
                RetryDecision::Retry(delay)
            }
        }
    }

    /// `min(cap, base * 2^(n-1))`, shortened by up to `jitter_ratio`.
    pub fn backoff(&self, failures: u32, jitter: f64) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let exp = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap);
        let jitter = jitter.clamp(0.0, 1.0);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let nanos = exp.as_nanos() as f64 * (1.0 - ratio * jitter);
        Duration::from_nanos(nanos.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            max_rate_limit_retries: 2,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(1_000),
            jitter_ratio: 0.5,
        }
    }

    fn transient() -> TranslateError {
        TranslateError::Transient("503".to_string())
    }

    #[test]
    fn test_transient_backoff_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.decide(&transient(), 1, 0, 0.0), RetryDecision::Retry(Duration::from_millis(100)));
        assert_eq!(p.decide(&transient(), 2, 0, 0.0), RetryDecision::Retry(Duration::from_millis(200)));
        assert_eq!(p.backoff(5, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.backoff(40, 0.0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_transient_gives_up_at_max_retries() {
        let p = policy();
        assert_eq!(p.decide(&transient(), 3, 0, 0.0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_jitter_only_shortens() {
        let p = policy();
        assert_eq!(p.backoff(2, 1.0), Duration::from_millis(100));
        assert_eq!(p.backoff(2, 0.5), Duration::from_millis(150));
        for j in [0.0, 0.3, 0.99] {
            assert!(p.backoff(4, j) <= p.backoff_cap);
        }
    }

    #[test]
    fn test_rate_limit_honours_hint_as_minimum() {
        let p = policy();
        let limited = TranslateError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(p.decide(&limited, 0, 1, 0.0), RetryDecision::Retry(Duration::from_secs(5)));

        let short_hint = TranslateError::RateLimited {
            retry_after: Some(Duration::from_millis(10)),
        };
        assert_eq!(p.decide(&short_hint, 0, 1, 0.0), RetryDecision::Retry(Duration::from_millis(100)));
    }

    #[test]
    fn test_rate_limit_budget_is_separate() {
        let p = policy();
        let limited = TranslateError::RateLimited { retry_after: None };
        // transient budget already exhausted; throttling still retries
        assert!(matches!(p.decide(&limited, 3, 1, 0.0), RetryDecision::Retry(_)));
        assert_eq!(p.decide(&limited, 0, 2, 0.0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_both_budgets_count_the_same_way() {
        let p = RetryPolicy {
            max_retries: 2,
            max_rate_limit_retries: 2,
            ..policy()
        };
        let limited = TranslateError::RateLimited { retry_after: None };
        assert!(matches!(p.decide(&transient(), 1, 0, 0.0), RetryDecision::Retry(_)));
        assert!(matches!(p.decide(&limited, 0, 1, 0.0), RetryDecision::Retry(_)));
        assert_eq!(p.decide(&transient(), 2, 0, 0.0), RetryDecision::GiveUp);
        assert_eq!(p.decide(&limited, 0, 2, 0.0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_permanent_and_fatal_classes() {
        let p = policy();
        assert_eq!(
            p.decide(&TranslateError::InvalidRequest("x".into()), 0, 0, 0.0),
            RetryDecision::GiveUp
        );
        assert_eq!(
            p.decide(&TranslateError::Authentication("x".into()), 0, 0, 0.0),
            RetryDecision::Fatal
        );
    }
}
