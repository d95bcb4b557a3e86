//! Closed error-kind classification.
//!
//! Every failure that crosses the transport boundary is classified exactly
//! once into an [`ErrorKind`]. Downstream components (retry predicates, the
//! fallback classifier) match on this enum instead of re-deriving meaning
//! from raw status codes or message text.
//!
//! ## Kind semantics
//!
//! | Kind | Retryable | Systemic | Typical source |
//! |------|-----------|----------|----------------|
//! | `RateLimited` | yes | yes | HTTP 429 |
//! | `ServerError` | yes | no | HTTP 5xx |
//! | `NetworkError` | yes | no | connect/timeout failures |
//! | `Unauthorized` | no | no | HTTP 401 |
//! | `Forbidden` | no | no | HTTP 403 |
//! | `Other` | no | no | everything else |
//!
//! Retrying an authorization failure cannot succeed and only wastes quota;
//! switching data sources cannot fix a credentials problem either. That
//! asymmetry is the heart of this table.
//!
//! ## Example
//!
//! ```rust
//! use dataguard::error_kind::ErrorKind;
//!
//! let kind = ErrorKind::from_status(429);
//! assert_eq!(kind, ErrorKind::RateLimited);
//! assert!(kind.retryable());
//! assert!(kind.is_systemic());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable classification of a remote-operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The upstream API rejected the request due to rate limiting (HTTP 429).
    RateLimited,
    /// The upstream API failed on its side (HTTP 5xx).
    ServerError,
    /// The request never produced an HTTP response (DNS, connect, timeout).
    NetworkError,
    /// Missing or expired credentials (HTTP 401).
    Unauthorized,
    /// Valid credentials but insufficient permissions (HTTP 403).
    Forbidden,
    /// Anything that does not fit the categories above.
    Other,
}

impl ErrorKind {
    /// Returns the standard name (e.g. `"rate_limited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Other => "other",
        }
    }

    /// Whether a retry of the same request can reasonably succeed.
    ///
    /// This is the default predicate; individual [`RetryPolicy`] profiles may
    /// narrow it further (the conservative profile retries only on
    /// `RateLimited`).
    ///
    /// [`RetryPolicy`]: crate::resilience::retry::RetryPolicy
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::NetworkError
        )
    }

    /// Whether the failure signals systemic unavailability of the data
    /// source, as opposed to a problem with this particular request.
    ///
    /// Only systemic failures may flip a [`FallbackCoordinator`] into
    /// degraded mode. Authorization failures are deliberately excluded:
    /// a secondary source will reject the same credentials.
    ///
    /// [`FallbackCoordinator`]: crate::fallback::FallbackCoordinator
    #[inline]
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Returns the category: `"rate"`, `"server"`, `"network"`, `"client"`,
    /// or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate",
            Self::ServerError => "server",
            Self::NetworkError => "network",
            Self::Unauthorized | Self::Forbidden => "client",
            Self::Other => "unknown",
        }
    }

    /// Maps an HTTP status code to the most likely `ErrorKind`.
    ///
    /// Status codes without a specific mapping (including the remaining
    /// 4xx family) return [`ErrorKind::Other`]: they describe a malformed
    /// request, and neither retry nor fallback can repair one.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
