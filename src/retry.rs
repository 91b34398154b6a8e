//! Failure classification and bounded retry of provider calls.

use crate::config::RetryConfig;
use crate::provider::{ProviderError, ProviderResult};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How a provider failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429 or rate-limit wording in the error body
    RateLimited,
    /// HTTP 529/503 or "overloaded" wording
    Overloaded,
    /// Other 5xx, timeouts and connection failures
    Transient,
    /// Other 4xx, undecodable bodies and empty responses
    NonRetryable,
}

impl FailureClass {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, FailureClass::NonRetryable)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::RateLimited => write!(f, "rate_limited"),
            FailureClass::Overloaded => write!(f, "overloaded"),
            FailureClass::Transient => write!(f, "transient"),
            FailureClass::NonRetryable => write!(f, "non_retryable"),
        }
    }
}

const RATE_LIMIT_WORDING: &[&str] = &["rate limit", "rate_limit", "too many requests", "quota"];

/// Classify one provider failure.
pub fn classify(error: &ProviderError) -> FailureClass {
    match error {
        ProviderError::Status { status, body, .. } => {
            let body = body.to_lowercase();
            if *status == 429 || RATE_LIMIT_WORDING.iter().any(|w| body.contains(w)) {
                FailureClass::RateLimited
            } else if *status == 529 || *status == 503 || body.contains("overloaded") {
                FailureClass::Overloaded
            } else if (500..600).contains(status) {
                FailureClass::Transient
            } else {
                FailureClass::NonRetryable
            }
        }
        ProviderError::Timeout(_) | ProviderError::Connect(_) | ProviderError::Request(_) => {
            FailureClass::Transient
        }
        ProviderError::Decode(_) | ProviderError::EmptyResponse => FailureClass::NonRetryable,
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    GiveUp(FailureClass),
}

/// A call that failed for good.
#[derive(Debug)]
pub struct Exhausted {
    pub class: FailureClass,
    pub attempts: usize,
    pub error: ProviderError,
}

/// Attempt ceiling and per-class backoff scales.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub rate_limit_backoff: Duration,
    pub overloaded_backoff: Duration,
    pub transient_backoff: Duration,
    /// Upper bound on a server-requested wait.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(5),
            overloaded_backoff: Duration::from_secs(2),
            transient_backoff: Duration::from_secs(3),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
            overloaded_backoff: Duration::from_millis(config.overloaded_backoff_ms),
            transient_backoff: Duration::from_millis(config.transient_backoff_ms),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and dry runs.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            rate_limit_backoff: Duration::ZERO,
            overloaded_backoff: Duration::ZERO,
            transient_backoff: Duration::ZERO,
            max_retry_after: Duration::ZERO,
        }
    }

    /// Decide what to do after `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: usize, error: &ProviderError) -> Decision {
        let class = classify(error);
        if !class.is_retriable() || attempt >= self.max_attempts {
            return Decision::GiveUp(class);
        }

        let scale = match class {
            FailureClass::RateLimited => self.rate_limit_backoff,
            FailureClass::Overloaded => self.overloaded_backoff,
            _ => self.transient_backoff,
        };
        let backoff = scale.saturating_mul(attempt as u32);

        let delay = match error.retry_after() {
            Some(requested) => backoff.max(requested.min(self.max_retry_after)),
            None => backoff,
        };
        Decision::Retry(delay)
    }

    /// Drive `call` until it succeeds or the policy gives up.
    ///
    /// Returns the value and the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<(T, usize), Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match call().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            match self.decide(attempt, &error) {
                Decision::Retry(delay) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:.1}s",
                        what,
                        attempt,
                        self.max_attempts,
                        error,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Decision::GiveUp(class) => {
                    debug!("{} gave up after {} attempt(s) ({})", what, attempt, class);
                    return Err(Exhausted {
                        class,
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status(code: u16, body: &str) -> ProviderError {
        ProviderError::Status {
            provider: ProviderKind::Gemini,
            status: code,
            body: body.to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify(&status(429, "")), FailureClass::RateLimited);
        assert_eq!(classify(&status(529, "")), FailureClass::Overloaded);
        assert_eq!(classify(&status(503, "")), FailureClass::Overloaded);
        assert_eq!(classify(&status(500, "")), FailureClass::Transient);
        assert_eq!(classify(&status(502, "")), FailureClass::Transient);
        assert_eq!(classify(&status(400, "bad request")), FailureClass::NonRetryable);
        assert_eq!(classify(&status(401, "")), FailureClass::NonRetryable);
    }

    #[test]
    fn test_classify_wording() {
        assert_eq!(
            classify(&status(400, "Resource has been exhausted (e.g. check QUOTA).")),
            FailureClass::RateLimited
        );
        assert_eq!(
            classify(&status(500, r#"{"type":"overloaded_error"}"#)),
            FailureClass::Overloaded
        );
    }

    #[test]
    fn test_classify_transport_errors() {
        assert_eq!(
            classify(&ProviderError::Timeout(Duration::from_secs(1))),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ProviderError::Connect("Gemini".to_string())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ProviderError::Decode("eof".to_string())),
            FailureClass::NonRetryable
        );
        assert_eq!(classify(&ProviderError::EmptyResponse), FailureClass::NonRetryable);
    }

    #[test]
    fn test_backoff_scales_with_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &status(429, "")),
            Decision::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(2, &status(429, "")),
            Decision::Retry(Duration::from_secs(10))
        );
        assert_eq!(
            policy.decide(1, &status(529, "")),
            Decision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(2, &status(500, "")),
            Decision::Retry(Duration::from_secs(6))
        );
    }

    #[test]
    fn test_gives_up_at_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(3, &status(500, "")),
            Decision::GiveUp(FailureClass::Transient)
        );
    }

    #[test]
    fn test_non_retryable_gives_up_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &status(400, "")),
            Decision::GiveUp(FailureClass::NonRetryable)
        );
    }

    #[test]
    fn test_retry_after_wins_when_larger_and_is_capped() {
        let policy = RetryPolicy::default();
        let with_header = |secs| ProviderError::Status {
            provider: ProviderKind::Anthropic,
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_secs(secs)),
        };

        assert_eq!(
            policy.decide(1, &with_header(20)),
            Decision::Retry(Duration::from_secs(20))
        );
        assert_eq!(
            policy.decide(1, &with_header(1)),
            Decision::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(1, &with_header(600)),
            Decision::Retry(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 0,
            rate_limit_backoff_ms: 100,
            overloaded_backoff_ms: 200,
            transient_backoff_ms: 300,
            max_retry_after_secs: 9,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.overloaded_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_retry_after, Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = RetryPolicy::immediate(3)
            .run("batch 1", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(status(429, "slow down"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        let (value, attempts) = result.unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<((), usize), Exhausted> = RetryPolicy::immediate(3)
            .run("batch 2", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(status(502, "bad gateway")) }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.class, FailureClass::Transient);
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_client_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<((), usize), Exhausted> = RetryPolicy::immediate(3)
            .run("batch 3", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(status(400, "invalid")) }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
