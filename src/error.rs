use crate::error_kind::ErrorKind;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error (e.g. "service.base_url").
    pub field_path: Option<String>,
    /// Additional context about the error (e.g. expected value, actual value).
    pub details: Option<String>,
    /// Source of the error (e.g. "circuit_breaker", "throttle").
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the resilient data-access layer.
///
/// Control-flow errors (`CircuitOpen`, `RetryExhausted`) are distinct from
/// the underlying operation's own failures: a caller seeing `CircuitOpen`
/// should treat it as a transient fail-fast, not as a hard failure.
#[derive(Debug, Error)]
pub enum Error {
    /// The named circuit breaker is open and the operation was never invoked.
    #[error("circuit breaker '{name}' is open, next attempt in {retry_in_ms}ms")]
    CircuitOpen { name: String, retry_in_ms: u64 },

    /// The retry budget was consumed without a success.
    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The remote API answered with a non-success status.
    #[error("remote error: HTTP {status} ({kind}): {message}")]
    Remote {
        status: u16,
        kind: ErrorKind,
        message: String,
        /// Server-provided retry hint (from a `Retry-After` header), if any.
        retry_after_ms: Option<u64>,
    },

    /// The request never produced an HTTP response.
    #[error("network transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context.
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context.
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// The classification of this error, resolved through control-flow
    /// wrappers: a `RetryExhausted` reports the kind of its last underlying
    /// failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Remote { kind, .. } => *kind,
            Error::Transport(_) => ErrorKind::NetworkError,
            Error::RetryExhausted { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        }
    }

    /// The HTTP-like status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            Error::RetryExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Server-provided retry hint, if the failure carried one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::Remote { retry_after_ms, .. } => *retry_after_ms,
            Error::RetryExhausted { source, .. } => source.retry_after_ms(),
            _ => None,
        }
    }

    /// Best-effort structural copy, used when one in-flight failure must be
    /// delivered to several concurrent waiters. Variants whose sources are
    /// not clonable degrade to a message-preserving form with the same
    /// classification.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::CircuitOpen { name, retry_in_ms } => Error::CircuitOpen {
                name: name.clone(),
                retry_in_ms: *retry_in_ms,
            },
            Error::RetryExhausted { attempts, source } => Error::RetryExhausted {
                attempts: *attempts,
                source: Box::new(source.duplicate()),
            },
            Error::Remote {
                status,
                kind,
                message,
                retry_after_ms,
            } => Error::Remote {
                status: *status,
                kind: *kind,
                message: message.clone(),
                retry_after_ms: *retry_after_ms,
            },
            Error::Transport(TransportError::Other(msg)) => {
                Error::Transport(TransportError::Other(msg.clone()))
            }
            Error::Transport(TransportError::Http(err)) => {
                Error::Transport(TransportError::Other(err.to_string()))
            }
            Error::Serialization(err) => Error::Runtime {
                message: format!("serialization error: {}", err),
                context: ErrorContext::new().with_source("cache"),
            },
            Error::Configuration { message, context } => Error::Configuration {
                message: message.clone(),
                context: context.clone(),
            },
            Error::Runtime { message, context } => Error::Runtime {
                message: message.clone(),
                context: context.clone(),
            },
        }
    }

    /// Whether this failure signals systemic unavailability of the data
    /// source. This is the single classification entry point consulted by
    /// [`FallbackCoordinator`](crate::fallback::FallbackCoordinator) when
    /// deciding to switch to the secondary source: rate limiting and an open
    /// circuit qualify; authorization and malformed-request failures do not.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. }) || self.kind().is_systemic()
    }
}
