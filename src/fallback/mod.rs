//! Adaptive primary/fallback coordination.
//!
//! A [`FallbackCoordinator`] wraps two [`DataSource`] implementations with
//! identical signatures behind one interface. While healthy, every call
//! goes to the primary. The first primary failure classified as *systemic*
//! (rate limiting, or a circuit breaker reporting open) stickily switches
//! the coordinator to the fallback. Once a resource is confirmed
//! systemically failing, probing it on every user action wastes quota and
//! worsens the outage, so the primary is not called again until an explicit
//! [`reset_to_primary`](FallbackCoordinator::reset_to_primary) or a
//! successful operator-triggered
//! [`probe_primary`](FallbackCoordinator::probe_primary).
//!
//! Non-systemic failures (authorization, malformed requests) propagate to
//! the caller without switching: a secondary source cannot fix a
//! credentials problem.

use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub mod static_source;

pub use static_source::StaticDataSource;

/// A keyed, asynchronous provider of JSON datasets.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Fetch the dataset identified by `key`.
    async fn fetch(&self, key: &str) -> Result<Value>;
}

/// Which of the two sources is currently serving calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Primary,
    Fallback,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Read-only snapshot of the coordinator, for diagnostics.
#[derive(Debug, Clone)]
pub struct FallbackStats {
    pub mode: SourceMode,
    /// Whether the fallback has ever been triggered since construction.
    /// Monotonic; survives `reset_to_primary`.
    pub ever_triggered: bool,
    pub primary_name: String,
    pub fallback_name: String,
}

struct FallbackState {
    mode: SourceMode,
    ever_triggered: bool,
}

/// Sticky two-source coordinator (see module docs).
pub struct FallbackCoordinator {
    primary: Arc<dyn DataSource>,
    fallback: Arc<dyn DataSource>,
    probe_key: Option<String>,
    state: Mutex<FallbackState>,
}

impl FallbackCoordinator {
    pub fn new(primary: Arc<dyn DataSource>, fallback: Arc<dyn DataSource>) -> Self {
        Self {
            primary,
            fallback,
            probe_key: None,
            state: Mutex::new(FallbackState {
                mode: SourceMode::Primary,
                ever_triggered: false,
            }),
        }
    }

    /// Designate the cheap dataset used by [`probe_primary`](Self::probe_primary).
    pub fn with_probe_key(mut self, key: impl Into<String>) -> Self {
        self.probe_key = Some(key.into());
        self
    }

    fn state_guard(&self) -> MutexGuard<'_, FallbackState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.state_guard().mode
    }

    /// Fetch `key` from the currently selected source, switching stickily
    /// to the fallback if the primary fails systemically. The call that
    /// observes the trip is already served from the fallback.
    pub async fn execute(&self, key: &str) -> Result<Value> {
        if self.mode() == SourceMode::Fallback {
            return self.fallback.fetch(key).await;
        }
        match self.primary.fetch(key).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_systemic() => {
                self.trip(&err);
                self.fallback.fetch(key).await
            }
            Err(err) => Err(err),
        }
    }

    /// The single mutation entry point for the sticky switch.
    fn trip(&self, cause: &Error) {
        let mut st = self.state_guard();
        if st.mode == SourceMode::Primary {
            st.mode = SourceMode::Fallback;
            st.ever_triggered = true;
            warn!(
                from = self.primary.name(),
                to = self.fallback.name(),
                cause = %cause,
                "primary systemically failing, switching to fallback source"
            );
        }
    }

    /// Unconditionally force the coordinator back to the primary source.
    pub fn reset_to_primary(&self) {
        let mut st = self.state_guard();
        if st.mode != SourceMode::Primary {
            st.mode = SourceMode::Primary;
            info!(primary = self.primary.name(), "coordinator reset to primary source");
        }
    }

    /// While in fallback mode, attempt one call against the primary using
    /// the configured probe key; on success, switch back. Returns whether
    /// the coordinator is on the primary afterwards.
    ///
    /// Operator/test-triggered only; never invoked automatically, which
    /// would defeat stickiness and hammer a known-bad resource.
    pub async fn probe_primary(&self) -> bool {
        if self.mode() == SourceMode::Primary {
            return true;
        }
        let Some(key) = self.probe_key.clone() else {
            warn!("probe requested but no probe key configured");
            return false;
        };
        match self.primary.fetch(&key).await {
            Ok(_) => {
                info!(primary = self.primary.name(), "probe succeeded, returning to primary");
                self.reset_to_primary();
                true
            }
            Err(err) => {
                info!(primary = self.primary.name(), error = %err, "probe failed, staying on fallback");
                false
            }
        }
    }

    pub fn stats(&self) -> FallbackStats {
        let st = self.state_guard();
        FallbackStats {
            mode: st.mode,
            ever_triggered: st.ever_triggered,
            primary_name: self.primary.name().to_string(),
            fallback_name: self.fallback.name().to_string(),
        }
    }
}

#[async_trait]
impl DataSource for FallbackCoordinator {
    fn name(&self) -> &str {
        match self.mode() {
            SourceMode::Primary => self.primary.name(),
            SourceMode::Fallback => self.fallback.name(),
        }
    }

    async fn fetch(&self, key: &str) -> Result<Value> {
        self.execute(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Primary stub whose first `fail_first` calls fail with `status`, then
    /// succeed. Counts invocations so fail-fast behavior is observable.
    struct ScriptedSource {
        name: &'static str,
        fail_first: u32,
        status: u16,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(name: &'static str, fail_first: u32, status: u16) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_first,
                status,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _key: &str) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::Remote {
                    status: self.status,
                    kind: ErrorKind::from_status(self.status),
                    message: "scripted failure".to_string(),
                    retry_after_ms: None,
                })
            } else {
                Ok(json!({"source": self.name}))
            }
        }
    }

    fn mock_fallback() -> Arc<StaticDataSource> {
        Arc::new(
            StaticDataSource::new("static")
                .with_dataset("categories", json!([{"id": 1, "name": "cached"}]))
                .with_dataset("probe", json!([])),
        )
    }

    #[tokio::test]
    async fn test_rate_limit_trips_and_serves_current_call_from_fallback() {
        let primary = ScriptedSource::new("remote", 1, 429);
        let coordinator =
            FallbackCoordinator::new(primary.clone(), mock_fallback());

        let value = coordinator.execute("categories").await.expect("fetch failed");
        assert_eq!(value, json!([{"id": 1, "name": "cached"}]));
        assert_eq!(coordinator.mode(), SourceMode::Fallback);
        assert!(coordinator.stats().ever_triggered);
    }

    #[tokio::test]
    async fn test_fallback_is_sticky_even_after_primary_recovers() {
        // primary fails once with 429, then would succeed
        let primary = ScriptedSource::new("remote", 1, 429);
        let coordinator =
            FallbackCoordinator::new(primary.clone(), mock_fallback());

        let _ = coordinator.execute("categories").await;
        assert_eq!(primary.calls(), 1);

        for _ in 0..3 {
            coordinator.execute("categories").await.expect("fetch failed");
        }
        // sticky: the recovered primary is never consulted
        assert_eq!(primary.calls(), 1);
        assert_eq!(coordinator.mode(), SourceMode::Fallback);
    }

    #[tokio::test]
    async fn test_permanent_error_propagates_without_switching() {
        let primary = ScriptedSource::new("remote", u32::MAX, 403);
        let coordinator =
            FallbackCoordinator::new(primary.clone(), mock_fallback());

        let err = coordinator
            .execute("categories")
            .await
            .expect_err("expected 403 to propagate");
        assert_eq!(err.status(), Some(403));
        assert_eq!(coordinator.mode(), SourceMode::Primary);
        assert!(!coordinator.stats().ever_triggered);
    }

    #[tokio::test]
    async fn test_circuit_open_error_trips_fallback() {
        struct OpenCircuitSource;

        #[async_trait]
        impl DataSource for OpenCircuitSource {
            fn name(&self) -> &str {
                "remote"
            }
            async fn fetch(&self, _key: &str) -> Result<Value> {
                Err(Error::CircuitOpen {
                    name: "remote".to_string(),
                    retry_in_ms: 15_000,
                })
            }
        }

        let coordinator =
            FallbackCoordinator::new(Arc::new(OpenCircuitSource), mock_fallback());
        coordinator.execute("categories").await.expect("fetch failed");
        assert_eq!(coordinator.mode(), SourceMode::Fallback);
    }

    #[tokio::test]
    async fn test_reset_to_primary_clears_mode_but_not_audit_flag() {
        let primary = ScriptedSource::new("remote", 1, 429);
        let coordinator =
            FallbackCoordinator::new(primary.clone(), mock_fallback());
        let _ = coordinator.execute("categories").await;
        assert_eq!(coordinator.mode(), SourceMode::Fallback);

        coordinator.reset_to_primary();
        assert_eq!(coordinator.mode(), SourceMode::Primary);
        assert!(coordinator.stats().ever_triggered);
    }

    #[tokio::test]
    async fn test_probe_success_returns_to_primary() {
        // fails once (trips), succeeds afterwards
        let primary = ScriptedSource::new("remote", 1, 429);
        let coordinator = FallbackCoordinator::new(primary.clone(), mock_fallback())
            .with_probe_key("probe");
        let _ = coordinator.execute("categories").await;
        assert_eq!(coordinator.mode(), SourceMode::Fallback);

        assert!(coordinator.probe_primary().await);
        assert_eq!(coordinator.mode(), SourceMode::Primary);
    }

    #[tokio::test]
    async fn test_probe_failure_stays_on_fallback() {
        let primary = ScriptedSource::new("remote", u32::MAX, 429);
        let coordinator = FallbackCoordinator::new(primary.clone(), mock_fallback())
            .with_probe_key("probe");
        let _ = coordinator.execute("categories").await;

        assert!(!coordinator.probe_primary().await);
        assert_eq!(coordinator.mode(), SourceMode::Fallback);
    }

    #[tokio::test]
    async fn test_name_tracks_active_source() {
        let primary = ScriptedSource::new("remote", 1, 429);
        let coordinator =
            FallbackCoordinator::new(primary.clone(), mock_fallback());
        assert_eq!(coordinator.name(), "remote");
        let _ = coordinator.execute("categories").await;
        assert_eq!(coordinator.name(), "static");
    }
}
