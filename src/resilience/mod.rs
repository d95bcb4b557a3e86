//! Resilience primitives: circuit breaking, bounded retry, and admission
//! control for remote operations.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Named three-phase breaker with fail-fast and trial recovery |
//! | [`retry`] | Backoff policies and the retry executor |
//! | [`throttle`] | FIFO batch queue limiting concurrent upstream requests |
//!
//! The three compose rather than inherit: a typical data-fetching call runs
//! throttle → breaker → retry → transport, each layer owning exactly one
//! concern.
//!
//! ```rust,no_run
//! use dataguard::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use dataguard::resilience::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn call() -> dataguard::Result<()> { Ok(()) }
//! # async fn demo() -> dataguard::Result<()> {
//! let breaker = CircuitBreaker::new(
//!     "reference-api",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_reset_timeout(Duration::from_secs(15)),
//! );
//! let retry = RetryPolicy::conservative();
//!
//! breaker
//!     .execute(|| async { retry.run(|| call()).await.into_result() })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod retry;
pub mod throttle;
