//! Fatal failure classification
//!
//! A [`FatalExceptionClassifier`] is an ordered chain of rules. Each rule has
//! a predicate that is tried against every error in the failure's source
//! chain, outermost first, and a mapper producing the [`FatalError`] that
//! halts the pipeline. The first matching rule wins; a failure no rule
//! matches is retryable.

use esink_core::{FailureKind, TransportError};
use once_cell::sync::Lazy;
use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Message used when no configured host accepts connections
pub const CONNECT_FAILURE_MESSAGE: &str =
    "Could not connect to Elasticsearch cluster using provided hosts";

/// Message used when the cluster rejects the configured credentials
pub const AUTH_FAILURE_MESSAGE: &str =
    "Elasticsearch cluster rejected the provided credentials";

static ELASTICSEARCH: Lazy<FatalExceptionClassifier> =
    Lazy::new(FatalExceptionClassifier::elasticsearch);

/// Unrecoverable failure that halts the pipeline
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct FatalError {
    message: String,
    #[source]
    cause: TransportError,
}

impl FatalError {
    /// Wrap `cause` with a description of why it is fatal
    pub fn new(message: impl Into<String>, cause: TransportError) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }

    /// Why the failure is fatal
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The transport failure that was classified
    pub fn cause(&self) -> &TransportError {
        &self.cause
    }
}

/// Outcome of classifying a failure
#[derive(Debug, Clone)]
pub enum Classification {
    /// Stop the pipeline with this error
    Fatal(FatalError),
    /// Retry the affected operations
    NotFatal,
}

impl Classification {
    /// True for [`Classification::Fatal`]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Classification::Fatal(_))
    }
}

type Predicate = Box<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;
type Mapper = Box<dyn Fn(&TransportError) -> FatalError + Send + Sync>;

struct Rule {
    name: &'static str,
    predicate: Predicate,
    mapper: Mapper,
}

/// Ordered chain of fatal-failure rules
#[derive(Default)]
pub struct FatalExceptionClassifier {
    rules: Vec<Rule>,
}

impl FatalExceptionClassifier {
    /// An empty chain; every failure is retryable
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain used for Elasticsearch clusters.
    ///
    /// Refused connections and unreachable hosts are fatal, as are rejected
    /// credentials. Timeouts, throttling and item rejections stay retryable.
    pub fn elasticsearch() -> Self {
        Self::new()
            .with_rule(
                "connect",
                |err| {
                    has_kind(err, &[FailureKind::ConnectionRefused, FailureKind::NoRouteToHost])
                        || err
                            .downcast_ref::<io::Error>()
                            .map_or(false, |e| e.kind() == io::ErrorKind::ConnectionRefused)
                },
                |cause| FatalError::new(CONNECT_FAILURE_MESSAGE, cause.clone()),
            )
            .with_rule(
                "auth",
                |err| {
                    has_kind(err, &[FailureKind::Unauthorized])
                        || err
                            .downcast_ref::<io::Error>()
                            .map_or(false, |e| e.kind() == io::ErrorKind::PermissionDenied)
                },
                |cause| FatalError::new(AUTH_FAILURE_MESSAGE, cause.clone()),
            )
    }

    /// Shared instance of [`FatalExceptionClassifier::elasticsearch`]
    pub fn elasticsearch_default() -> &'static FatalExceptionClassifier {
        &ELASTICSEARCH
    }

    /// Append a rule; rules are evaluated in registration order
    pub fn with_rule<P, M>(mut self, name: &'static str, predicate: P, mapper: M) -> Self
    where
        P: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
        M: Fn(&TransportError) -> FatalError + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            name,
            predicate: Box::new(predicate),
            mapper: Box::new(mapper),
        });
        self
    }

    /// Append a rule matching any error in the chain of type `E`
    pub fn with_source_type<E>(self, name: &'static str, message: &'static str) -> Self
    where
        E: StdError + 'static,
    {
        self.with_rule(
            name,
            |err| err.is::<E>(),
            move |cause| FatalError::new(message, cause.clone()),
        )
    }

    /// Number of rules in the chain
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the chain has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify a failure, first matching rule wins
    pub fn classify(&self, error: &TransportError) -> Classification {
        for rule in &self.rules {
            let mut current = Some(error as &(dyn StdError + 'static));
            while let Some(err) = current {
                if (rule.predicate)(err) {
                    tracing::debug!(rule = rule.name, error = %error, "failure classified as fatal");
                    return Classification::Fatal((rule.mapper)(error));
                }
                current = next_in_chain(err);
            }
        }
        Classification::NotFatal
    }

    /// True if some rule matches
    pub fn is_fatal(&self, error: &TransportError) -> bool {
        self.classify(error).is_fatal()
    }
}

impl fmt::Debug for FatalExceptionClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalExceptionClassifier")
            .field("rules", &self.rules.iter().map(|r| r.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Step to the next error in a failure chain.
///
/// Transport errors hand out their wrapped cause directly so predicates can
/// downcast it; every other error follows `Error::source`.
fn next_in_chain<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a (dyn StdError + 'static)> {
    match err.downcast_ref::<TransportError>() {
        Some(transport) => transport
            .underlying()
            .map(|cause| cause as &(dyn StdError + 'static)),
        None => err.source(),
    }
}

fn has_kind(err: &(dyn StdError + 'static), kinds: &[FailureKind]) -> bool {
    err.downcast_ref::<TransportError>()
        .map_or(false, |e| kinds.contains(&e.kind()))
}
