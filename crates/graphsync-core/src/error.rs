//! Error taxonomy shared by the request pipeline and the URL cache.

use std::fmt;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a context stopped an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cancellation token was triggered.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "context cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Failure reported by the wire client (or the auth provider) for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Peer reset the connection mid-exchange.
    #[error("connection reset by peer")]
    ConnectionReset,
    /// The attempt did not finish within the per-call timeout.
    #[error("handler timeout")]
    HandlerTimeout,
    /// Credential provider could not produce an authorization header.
    #[error("auth: {0}")]
    Auth(String),
    /// Any other transport failure (DNS, TLS, malformed framing, ...).
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Connection resets and handler timeouts are always retried, whatever the status.
    pub fn is_transient_transport(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionReset | TransportError::HandlerTimeout
        )
    }
}

/// Error returned by every public operation of this crate.
///
/// `Clone` so that a single failed refresh can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed input to a contract call. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Item absent from a verified-fresh cache state.
    #[error("item {id} not found in cache")]
    NotFound { id: String },

    /// Item was deleted at the source.
    #[error("item {id} was deleted")]
    Gone { id: String },

    /// Retry budget exhausted on transient failures.
    #[error("throttled after {attempts} attempts (last status: {}, last error: {})",
        fmt_status(.last_status), fmt_opt(.last_error))]
    Throttled {
        attempts: u32,
        last_status: Option<u16>,
        last_error: Option<String>,
    },

    /// Ambient context was cancelled or its deadline passed.
    #[error("{0}")]
    Cancelled(CancelReason),

    /// Permanent failure: 4xx (except 429), unparseable response, or broken invariant.
    #[error("fatal{}: {message}", fmt_http(.status))]
    Fatal {
        status: Option<u16>,
        message: String,
    },

    /// The delta cursor handed to the enumerator is no longer accepted by the remote.
    #[error("delta cursor expired")]
    CursorExpired,

    /// Record-level failures accumulated over one refresh pass.
    #[error("{} record errors during refresh; first: {}", .0.len(), fmt_first(.0))]
    Partial(Vec<Error>),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

fn fmt_opt(s: &Option<String>) -> &str {
    s.as_deref().unwrap_or("none")
}

fn fmt_http(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn fmt_first(errors: &[Error]) -> String {
    errors.first().map(|e| e.to_string()).unwrap_or_default()
}

/// Flat view of [`Error`] for callers that only branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Gone,
    Throttled,
    Cancelled,
    Fatal,
    CursorExpired,
    Partial,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Gone { .. } => ErrorKind::Gone,
            Error::Throttled { .. } => ErrorKind::Throttled,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Fatal { .. } => ErrorKind::Fatal,
            Error::CursorExpired => ErrorKind::CursorExpired,
            Error::Partial(_) => ErrorKind::Partial,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn fatal(status: Option<u16>, msg: impl Into<String>) -> Self {
        Error::Fatal {
            status,
            message: msg.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
