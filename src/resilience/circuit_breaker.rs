use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Consecutive half-open successes required before the circuit closes again.
const TRIAL_SUCCESSES_TO_CLOSE: u32 = 2;

/// Phase of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    /// Normal operation, requests pass through.
    Closed,
    /// The guarded resource is assumed down, requests fail fast.
    Open,
    /// Cooldown elapsed, trial requests probe whether the resource recovered.
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing trial calls.
    pub reset_timeout: Duration,
    /// Diagnostic observation window, echoed in stats.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = period;
        self
    }
}

/// Read-only snapshot of a breaker, for diagnostics and operations.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub trial_successes: u32,
    /// Milliseconds since the last recorded failure, if any.
    pub last_failure_ms_ago: Option<u64>,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub monitoring_period_ms: u64,
}

#[derive(Debug)]
struct State {
    phase: CircuitPhase,
    consecutive_failures: u32,
    trial_successes: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            trial_successes: 0,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }
}

/// Named circuit breaker guarding one logical resource.
///
/// Invariant: while `phase == Open`, `next_attempt_at` is set and lies after
/// the failure that opened the circuit. The wrapped operation is never
/// invoked while the circuit is open and the cooldown has not elapsed.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker.
    ///
    /// Fails fast with [`Error::CircuitOpen`] while the circuit is open and
    /// the cooldown has not elapsed; otherwise invokes the operation and
    /// records its outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    /// Gate a call: reject while open, transition to half-open once the
    /// cooldown elapsed. The lock is never held across an await.
    fn admit(&self) -> Result<()> {
        let mut st = self.state.lock().map_err(|_| {
            Error::runtime_with_context(
                "circuit breaker state poisoned",
                crate::ErrorContext::new().with_source("circuit_breaker"),
            )
        })?;
        if st.phase == CircuitPhase::Open {
            let now = Instant::now();
            if let Some(next) = st.next_attempt_at {
                if now < next {
                    return Err(Error::CircuitOpen {
                        name: self.name.clone(),
                        retry_in_ms: next.duration_since(now).as_millis() as u64,
                    });
                }
            }
            st.phase = CircuitPhase::HalfOpen;
            st.trial_successes = 0;
            info!(breaker = %self.name, "circuit half-open, admitting trial calls");
        }
        Ok(())
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.consecutive_failures = 0;
            if st.phase == CircuitPhase::HalfOpen {
                st.trial_successes = st.trial_successes.saturating_add(1);
                if st.trial_successes >= TRIAL_SUCCESSES_TO_CLOSE {
                    st.phase = CircuitPhase::Closed;
                    st.next_attempt_at = None;
                    info!(breaker = %self.name, "circuit closed after successful trials");
                }
            }
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        if let Ok(mut st) = self.state.lock() {
            let now = Instant::now();
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            st.last_failure_at = Some(now);
            if st.phase == CircuitPhase::HalfOpen {
                // A single half-open failure re-opens the circuit, no grace.
                st.phase = CircuitPhase::Open;
                st.trial_successes = 0;
                st.next_attempt_at = Some(now + self.cfg.reset_timeout);
                warn!(breaker = %self.name, "circuit re-opened by half-open failure");
            } else if st.phase == CircuitPhase::Closed
                && st.consecutive_failures >= self.cfg.failure_threshold
            {
                st.phase = CircuitPhase::Open;
                st.next_attempt_at = Some(now + self.cfg.reset_timeout);
                warn!(
                    breaker = %self.name,
                    failures = st.consecutive_failures,
                    "circuit opened, failure threshold reached"
                );
            }
        }
    }

    /// Force the breaker back to closed with all counters zeroed.
    ///
    /// Operator-triggered recovery; also what test suites use to get a
    /// deterministic starting state.
    pub fn reset(&self) {
        if let Ok(mut st) = self.state.lock() {
            *st = State::new();
            info!(breaker = %self.name, "circuit reset to closed");
        }
    }

    /// Whether a call issued right now would be admitted.
    pub fn is_available(&self) -> bool {
        match self.state.lock() {
            Ok(st) => match st.phase {
                CircuitPhase::Closed => true,
                CircuitPhase::HalfOpen => st.trial_successes < TRIAL_SUCCESSES_TO_CLOSE,
                CircuitPhase::Open => st
                    .next_attempt_at
                    .map(|next| Instant::now() >= next)
                    .unwrap_or(true),
            },
            Err(_) => false,
        }
    }

    /// Read-only snapshot of phase, counters and timestamps.
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let (phase, consecutive_failures, trial_successes, last_failure_ms_ago, open_remaining_ms) =
            match self.state.lock() {
                Ok(st) => (
                    st.phase,
                    st.consecutive_failures,
                    st.trial_successes,
                    st.last_failure_at
                        .map(|at| now.duration_since(at).as_millis() as u64),
                    st.next_attempt_at.and_then(|next| {
                        if next > now {
                            Some(next.duration_since(now).as_millis() as u64)
                        } else {
                            None
                        }
                    }),
                ),
                Err(_) => (CircuitPhase::Closed, 0, 0, None, None),
            };
        CircuitBreakerStats {
            name: self.name.clone(),
            phase,
            consecutive_failures,
            trial_successes,
            last_failure_ms_ago,
            open_remaining_ms,
            failure_threshold: self.cfg.failure_threshold,
            reset_timeout_ms: self.cfg.reset_timeout.as_millis() as u64,
            monitoring_period_ms: self.cfg.monitoring_period.as_millis() as u64,
        }
    }
}

/// Explicit registry of named breakers.
///
/// One instance per name for the registry's lifetime; constructed once at
/// the composition root and passed by reference to every consumer, so tests
/// can build a fresh registry instead of sharing ambient singletons.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the breaker for `name`, creating it with `cfg` on first
    /// reference. A later call with a different config returns the existing
    /// instance unchanged.
    pub fn get_or_create(&self, name: &str, cfg: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut map = match self.breakers.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, cfg)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        match self.breakers.lock() {
            Ok(map) => map.get(name).cloned(),
            Err(_) => None,
        }
    }

    /// Reset every registered breaker to closed.
    pub fn reset_all(&self) {
        if let Ok(map) = self.breakers.lock() {
            for breaker in map.values() {
                breaker.reset();
            }
        }
    }

    /// Snapshot of every registered breaker.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        match self.breakers.lock() {
            Ok(map) => map.values().map(|b| b.stats()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing() -> Result<()> {
        Err(Error::Remote {
            status: 500,
            kind: ErrorKind::ServerError,
            message: "boom".to_string(),
            retry_after_ms: None,
        })
    }

    fn cfg(threshold: u32, reset_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(threshold)
            .with_reset_timeout(Duration::from_millis(reset_ms))
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let cb = CircuitBreaker::new("t", cfg(3, 100));
        for _ in 0..2 {
            let _ = cb.execute(|| async { failing() }).await;
        }
        assert_eq!(cb.stats().phase, CircuitPhase::Closed);
        assert_eq!(cb.stats().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let cb = CircuitBreaker::new("t", cfg(3, 100));
        for _ in 0..3 {
            let _ = cb.execute(|| async { failing() }).await;
        }
        let stats = cb.stats();
        assert_eq!(stats.phase, CircuitPhase::Open);
        assert!(stats.open_remaining_ms.is_some());
    }

    #[tokio::test]
    async fn test_fail_fast_never_invokes_operation() {
        let cb = CircuitBreaker::new("t", cfg(1, 200));
        let _ = cb.execute(|| async { failing() }).await;
        assert_eq!(cb.stats().phase, CircuitPhase::Open);

        let calls = AtomicU32::new(0);
        let result = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_recovery_after_two_successes() {
        let cb = CircuitBreaker::new("t", cfg(1, 20));
        let _ = cb.execute(|| async { failing() }).await;
        assert_eq!(cb.stats().phase, CircuitPhase::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cb.execute(|| async { Ok(()) }).await.is_ok());
        assert_eq!(cb.stats().phase, CircuitPhase::HalfOpen);
        assert!(cb.execute(|| async { Ok(()) }).await.is_ok());
        assert_eq!(cb.stats().phase, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("t", cfg(1, 20));
        let _ = cb.execute(|| async { failing() }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = cb.execute(|| async { failing() }).await;
        let stats = cb.stats();
        assert_eq!(stats.phase, CircuitPhase::Open);
        assert!(stats.open_remaining_ms.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("t", cfg(3, 100));
        let _ = cb.execute(|| async { failing() }).await;
        let _ = cb.execute(|| async { failing() }).await;
        assert!(cb.execute(|| async { Ok(()) }).await.is_ok());
        assert_eq!(cb.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let cb = CircuitBreaker::new("t", cfg(1, 60_000));
        let _ = cb.execute(|| async { failing() }).await;
        assert_eq!(cb.stats().phase, CircuitPhase::Open);

        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.phase, CircuitPhase::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(cb.is_available());
    }

    #[test]
    fn test_registry_returns_same_instance_per_name() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("api", cfg(3, 100));
        let b = registry.get_or_create("api", cfg(9, 999));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.stats().failure_threshold, 3);
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_registry_reset_all() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("a", cfg(1, 60_000));
        let _ = a.execute(|| async { failing() }).await;
        assert_eq!(a.stats().phase, CircuitPhase::Open);

        registry.reset_all();
        assert_eq!(a.stats().phase, CircuitPhase::Closed);
        assert_eq!(registry.all_stats().len(), 1);
    }
}
