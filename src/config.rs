//! Configuration surface for the data-access stack.
//!
//! All configuration is plain data with builder-style setters. Environment
//! overrides exist for the deployment-dependent transport knobs so packaged
//! applications can be re-tuned without a rebuild.

use crate::cache::CacheConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::throttle::ThrottleConfig;
use crate::{Error, ErrorContext, Result};
use std::env;
use std::time::Duration;
use url::Url;

const ENV_HTTP_TIMEOUT_SECS: &str = "DATAGUARD_HTTP_TIMEOUT_SECS";
const ENV_BEARER_TOKEN: &str = "DATAGUARD_BEARER_TOKEN";
const ENV_POOL_MAX_IDLE: &str = "DATAGUARD_HTTP_POOL_MAX_IDLE_PER_HOST";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Attached as a bearer `Authorization` header when present. Token
    /// acquisition and storage belong to the embedding application.
    pub bearer_token: Option<String>,
    pub pool_max_idle_per_host: usize,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
            bearer_token: None,
            pool_max_idle_per_host: 8,
        }
    }

    /// Like [`new`](Self::new), with environment overrides applied.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        let mut cfg = Self::new(base_url);
        if let Some(secs) = env::var(ENV_HTTP_TIMEOUT_SECS)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            cfg.timeout = Duration::from_secs(secs);
        }
        if let Ok(token) = env::var(ENV_BEARER_TOKEN) {
            if !token.is_empty() {
                cfg.bearer_token = Some(token);
            }
        }
        if let Some(n) = env::var(ENV_POOL_MAX_IDLE)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            cfg.pool_max_idle_per_host = n;
        }
        cfg
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base url: {}", e),
                ErrorContext::new()
                    .with_field_path("transport.base_url")
                    .with_details(self.base_url.clone()),
            )
        })?;
        Ok(())
    }
}

/// One remotely fetched dataset: a cache key and the path serving it.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub key: String,
    pub path: String,
    /// Freshness override for this dataset; falls back to the cache-wide
    /// default. Tuned per dataset rather than hardcoded at call sites.
    pub ttl: Option<Duration>,
}

impl EndpointSpec {
    pub fn new(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Aggregate configuration for a [`RemoteDataService`].
///
/// The defaults are the profile used for non-critical reference data:
/// a 3-failure breaker with a short cooldown and a conservative retry
/// policy that only retries rate limiting.
///
/// [`RemoteDataService`]: crate::service::RemoteDataService
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub throttle: ThrottleConfig,
    pub cache: CacheConfig,
    pub endpoints: Vec<EndpointSpec>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::new(base_url),
            breaker: CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_reset_timeout(Duration::from_secs(20))
                .with_monitoring_period(Duration::from_secs(45)),
            retry: RetryPolicy::conservative(),
            throttle: ThrottleConfig::default(),
            cache: CacheConfig::default(),
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: EndpointSpec) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}
