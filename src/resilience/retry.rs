use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Immutable retry configuration: attempt budget, backoff curve, and the
/// predicate deciding which errors are worth retrying.
///
/// Retrying an authorization failure cannot succeed and only wastes quota,
/// so no profile ever retries 401/403; the profiles differ in how eagerly
/// they retry the transient kinds.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    retry_on: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retry_on: Arc::new(|err| err.kind().retryable()),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Default profile: 3 attempts, 1s base delay, retries every transient
    /// kind (rate-limited, server, network).
    pub fn new() -> Self {
        Self::default()
    }

    /// Few attempts, longer delays, retries only on rate limiting.
    ///
    /// For non-critical batch data where giving up early is cheaper than
    /// pressuring an already struggling upstream.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
            retry_on: Arc::new(|err| err.kind() == crate::error_kind::ErrorKind::RateLimited),
        }
    }

    /// More attempts, shorter delays, retries on rate limiting and network
    /// failures. For user-initiated critical actions.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(15_000),
            backoff_multiplier: 1.5,
            retry_on: Arc::new(|err| {
                matches!(
                    err.kind(),
                    crate::error_kind::ErrorKind::RateLimited
                        | crate::error_kind::ErrorKind::NetworkError
                )
            }),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replace the retryability predicate.
    pub fn with_retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.retry_on)(err)
    }

    /// Backoff before the attempt following `attempt` (1-based):
    /// `min(base * multiplier^(attempt-1), max)`. A server-provided
    /// `Retry-After` hint is preferred over the computed value, still capped
    /// at `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let computed =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent as i32);
        let cap = self.max_delay.as_millis() as u64;
        let chosen = match retry_after_ms {
            Some(hint) => hint,
            None => computed.min(cap as f64) as u64,
        };
        Duration::from_millis(chosen.min(cap))
    }

    /// Run `op` under this policy.
    ///
    /// The outcome distinguishes a consumed budget
    /// ([`Error::RetryExhausted`] wrapping the last failure) from an error
    /// the predicate refused to retry, which propagates unwrapped after a
    /// single attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        outcome: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(err) => {
                    if !self.is_retryable(&err) {
                        return RetryOutcome {
                            outcome: Err(err),
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        };
                    }
                    if attempt >= self.max_attempts {
                        return RetryOutcome {
                            outcome: Err(Error::RetryExhausted {
                                attempts: attempt,
                                source: Box::new(err),
                            }),
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        };
                    }
                    let delay = self.delay_for(attempt, err.retry_after_ms());
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Result of a retried operation, with the attempt count and total elapsed
/// time for diagnostics.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub outcome: Result<T>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<T> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn remote(status: u16) -> Error {
        Error::Remote {
            status,
            kind: ErrorKind::from_status(status),
            message: "test".to_string(),
            retry_after_ms: None,
        }
    }

    fn fast(policy: RetryPolicy) -> RetryPolicy {
        policy
            .with_base_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_forbidden_makes_exactly_one_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = fast(RetryPolicy::new().with_max_attempts(5))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(remote(403)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        // propagates the original error, not an exhaustion wrapper
        assert!(matches!(outcome.outcome, Err(Error::Remote { status: 403, .. })));
    }

    #[tokio::test]
    async fn test_exhausts_budget_on_persistent_rate_limit() {
        let calls = AtomicU32::new(0);
        let outcome = fast(RetryPolicy::new().with_max_attempts(3))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(remote(429)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match outcome.outcome {
            Err(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.status(), Some(429));
            }
            other => panic!("expected RetryExhausted, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_succeeds_once_budget_allows_fourth_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = fast(RetryPolicy::new().with_max_attempts(4))
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(remote(429))
                    } else {
                        Ok("data")
                    }
                }
            })
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 4);
    }

    #[test]
    fn test_backoff_growth_is_monotonic_and_capped() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000))
            .with_backoff_multiplier(2.0);
        let delays: Vec<Duration> = (1..=6).map(|a| policy.delay_for(a, None)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delays must be non-decreasing");
        }
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(1000)));
        assert_eq!(delays[5], Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_after_hint_preferred_but_capped() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1, Some(250)), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1, Some(60_000)), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_conservative_does_not_retry_server_errors() {
        let calls = AtomicU32::new(0);
        let outcome = fast(RetryPolicy::conservative())
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(remote(503)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome.outcome, Err(Error::Remote { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_aggressive_retries_network_errors() {
        let calls = AtomicU32::new(0);
        let outcome = fast(RetryPolicy::aggressive().with_max_attempts(2))
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::Transport(crate::transport::TransportError::Other(
                            "connection refused".to_string(),
                        )))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
    }
}
