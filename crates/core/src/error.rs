//! Failure types reported by the remote transport
//!
//! The sink never sees the wire client's native errors. Bridges translate
//! them into a [`TransportError`] carrying a coarse [`FailureKind`] and,
//! optionally, the original error as its source so classifiers can inspect
//! the whole chain.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Coarse category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The remote host actively refused the connection
    ConnectionRefused,
    /// No route to any configured host
    NoRouteToHost,
    /// Credentials were rejected
    Unauthorized,
    /// The request timed out
    Timeout,
    /// The store is shedding load (HTTP 429 and friends)
    Throttled,
    /// The store rejected a single item (mapping errors, version conflicts, ...)
    Rejected,
    /// Anything else
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ConnectionRefused => "connection refused",
            FailureKind::NoRouteToHost => "no route to host",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Timeout => "timeout",
            FailureKind::Throttled => "throttled",
            FailureKind::Rejected => "rejected",
            FailureKind::Other => "transport error",
        };
        f.write_str(name)
    }
}

/// Failure raised by a bulk request, either for the whole batch or for one item
///
/// Cheap to clone: the optional source is reference counted.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: FailureKind,
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl TransportError {
    /// Create an error with no underlying source
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Wrap an I/O error, deriving the kind from its `ErrorKind`
    pub fn from_io(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
            io::ErrorKind::TimedOut => FailureKind::Timeout,
            io::ErrorKind::PermissionDenied => FailureKind::Unauthorized,
            _ => FailureKind::Other,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }

    /// Shorthand for a per-item rejection
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    /// Failure category
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Human-readable description
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped error itself, without the shared pointer around it
    ///
    /// `Error::source` yields the `Arc`, which hides the concrete type from
    /// `downcast_ref`; chain walkers should step through this instead.
    pub fn underlying(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::from_io(err)
    }
}
