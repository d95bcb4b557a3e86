//! # dataguard
//!
//! Resilient remote-data access layer for clients embedded in interactive
//! applications: failure classification, bounded retry, backpressure,
//! single-flight caching, and automatic degraded-mode operation over a
//! remote HTTP API.
//!
//! ## Overview
//!
//! Interactive applications funnel many concurrent logical callers (event
//! handlers, background refreshes) through a small number of shared remote
//! resources. Left alone, that pattern produces duplicate concurrent
//! requests, hammering of known-bad upstreams, and rate-limit spirals. This
//! crate provides the small set of cooperating utilities every
//! data-fetching service is built on top of:
//!
//! - a caller asks the [`FallbackCoordinator`](fallback::FallbackCoordinator)
//!   for data,
//! - the primary [`RemoteDataService`](service::RemoteDataService) consults
//!   its [`SingleFlightCache`](cache::SingleFlightCache),
//! - a cache miss goes through the
//!   [`RequestThrottle`](resilience::throttle::RequestThrottle),
//! - each admitted operation runs through its named
//!   [`CircuitBreaker`](resilience::circuit_breaker::CircuitBreaker),
//! - which invokes the [`RetryPolicy`](resilience::retry::RetryPolicy)-wrapped
//!   network call.
//!
//! Results and classified errors flow back up, with the cache and the
//! coordinator reacting to the classification.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dataguard::config::{EndpointSpec, ServiceConfig};
//! use dataguard::fallback::{FallbackCoordinator, StaticDataSource};
//! use dataguard::resilience::circuit_breaker::CircuitBreakerRegistry;
//! use dataguard::service::RemoteDataService;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> dataguard::Result<()> {
//!     let registry = CircuitBreakerRegistry::new();
//!     let primary = RemoteDataService::new(
//!         ServiceConfig::new("reference", "https://api.example.com")
//!             .with_endpoint(EndpointSpec::new("categories", "/api/categories")),
//!         &registry,
//!     )?;
//!     let fallback = StaticDataSource::new("static")
//!         .with_dataset("categories", json!([{"id": 1, "name": "General"}]));
//!
//!     let coordinator =
//!         FallbackCoordinator::new(Arc::new(primary), Arc::new(fallback))
//!             .with_probe_key("categories");
//!
//!     let categories = coordinator.execute("categories").await?;
//!     println!("{}", categories);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error_kind`] | Closed error-kind classification |
//! | [`transport`] | HTTP boundary where classification happens |
//! | [`resilience`] | Circuit breaker, retry policies, request throttle |
//! | [`cache`] | Single-flight TTL memoization |
//! | [`fallback`] | Sticky primary/fallback coordination |
//! | [`service`] | Composition root wiring the stack per remote service |
//! | [`config`] | Plain-data configuration for every layer |

pub mod cache;
pub mod config;
pub mod error_kind;
pub mod fallback;
pub mod resilience;
pub mod service;
pub mod transport;

// Re-export main types for convenience
pub use cache::SingleFlightCache;
pub use config::{EndpointSpec, ServiceConfig, TransportConfig};
pub use error_kind::ErrorKind;
pub use fallback::{DataSource, FallbackCoordinator, SourceMode, StaticDataSource};
pub use resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPhase,
};
pub use resilience::retry::{RetryOutcome, RetryPolicy};
pub use resilience::throttle::{RequestThrottle, ThrottleConfig};
pub use service::RemoteDataService;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
