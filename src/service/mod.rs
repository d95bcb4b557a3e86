//! Composition root wiring the full access stack for one remote service.
//!
//! A [`RemoteDataService`] owns the per-service pieces (cache, throttle,
//! retry policy, transport) and borrows the process-wide pieces (its named
//! circuit breaker, from an injected [`CircuitBreakerRegistry`]). A fetch
//! flows cache → throttle → breaker → retry → transport; each layer owns
//! exactly one concern and never reaches into another's state.

use crate::cache::{CacheStats, SingleFlightCache};
use crate::config::{EndpointSpec, ServiceConfig};
use crate::fallback::DataSource;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStats,
};
use crate::resilience::retry::RetryPolicy;
use crate::resilience::throttle::{RequestThrottle, ThrottleStats};
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Outcome of loading every configured endpoint at once.
#[derive(Debug)]
pub struct LoadReport {
    pub successes: Vec<(String, Value)>,
    pub failures: Vec<(String, Error)>,
    pub elapsed: Duration,
}

impl LoadReport {
    fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.successes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Aggregated diagnostics for one service.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub name: String,
    pub cache: CacheStats,
    pub throttle: ThrottleStats,
    pub breaker: CircuitBreakerStats,
}

/// Resilient client for one remote API's reference-data endpoints.
pub struct RemoteDataService {
    name: String,
    transport: Arc<HttpTransport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    throttle: RequestThrottle,
    cache: SingleFlightCache<Value>,
    default_ttl: Duration,
    endpoints: HashMap<String, EndpointSpec>,
}

impl RemoteDataService {
    /// Build the service from its configuration, registering (or reusing)
    /// its named breaker in `registry`.
    pub fn new(cfg: ServiceConfig, registry: &CircuitBreakerRegistry) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&cfg.transport)?);
        let breaker = registry.get_or_create(&cfg.name, cfg.breaker.clone());
        let default_ttl = cfg.cache.default_ttl;
        let endpoints = cfg
            .endpoints
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        Ok(Self {
            name: cfg.name,
            transport,
            breaker,
            retry: cfg.retry,
            throttle: RequestThrottle::new(cfg.throttle),
            cache: SingleFlightCache::new(cfg.cache),
            default_ttl,
            endpoints,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint_keys(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Fetch one configured dataset through the full stack.
    pub async fn fetch(&self, key: &str) -> Result<Value> {
        let endpoint = self.endpoints.get(key).ok_or_else(|| {
            Error::configuration_with_context(
                format!("no endpoint configured for key '{}'", key),
                ErrorContext::new()
                    .with_field_path(key)
                    .with_source(self.name.clone()),
            )
        })?;
        let ttl = endpoint.ttl.unwrap_or(self.default_ttl);
        let path = endpoint.path.clone();
        let transport = Arc::clone(&self.transport);
        let breaker = Arc::clone(&self.breaker);
        let retry = self.retry.clone();
        let throttle = self.throttle.clone();

        self.cache
            .get_or_fetch_with_ttl(key, ttl, move || async move {
                throttle
                    .execute(move || async move {
                        breaker
                            .execute(|| async {
                                retry
                                    .run(|| {
                                        let transport = Arc::clone(&transport);
                                        let path = path.clone();
                                        async move { transport.get_json(&path).await }
                                    })
                                    .await
                                    .into_result()
                            })
                            .await
                    })
                    .await
            })
            .await
    }

    /// Load every configured endpoint concurrently. One endpoint failing
    /// never aborts the others; the report carries per-key outcomes.
    pub async fn load_all(&self) -> LoadReport {
        let started = Instant::now();
        let keys: Vec<String> = self.endpoints.keys().cloned().collect();
        let results = join_all(keys.iter().map(|key| self.fetch(key))).await;

        let mut report = LoadReport::new();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(value) => report.successes.push((key, value)),
                Err(err) => {
                    warn!(service = %self.name, key = %key, error = %err, "endpoint failed to load");
                    report.failures.push((key, err));
                }
            }
        }
        report.elapsed = started.elapsed();
        report
    }

    /// Drop the cached value (and any in-flight fetch) for one dataset.
    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Drop every cached value and in-flight fetch.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Operator-triggered breaker recovery.
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    pub fn stats(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            name: self.name.clone(),
            cache: self.cache.stats(),
            throttle: self.throttle.stats(),
            breaker: self.breaker.stats(),
        }
    }
}

#[async_trait]
impl DataSource for RemoteDataService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &str) -> Result<Value> {
        RemoteDataService::fetch(self, key).await
    }
}
