//! Error types for the AccessPoint controller

use std::time::Duration;

use thiserror::Error;

use crate::gateway::GatewayError;

/// Classification of failures used to decide between retrying and surfacing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Throttling, timeouts, service unavailability
    Transient,
    /// The external resource does not exist
    NotFound,
    /// The external resource already exists
    Conflict,
    /// The request can never succeed as written
    Validation,
    /// The resource did not become ready in time
    DeadlineExceeded,
}

impl ErrorKind {
    /// Machine-readable condition reason for this kind
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transient => "TransientError",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::Validation => "ValidationError",
            Self::DeadlineExceeded => "DeadlineExceeded",
        }
    }

    /// Returns true if an operation failing with this kind may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::NotFound | Self::Conflict)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Main error type for controller operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A gateway call failed
    #[error("{operation} failed for {resource}: {source}")]
    Gateway {
        /// Resource the call was made for
        resource: String,
        /// Gateway operation name
        operation: &'static str,
        /// Underlying gateway error
        #[source]
        source: GatewayError,
    },

    /// The desired spec can never be realized as written
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource that failed validation
        resource: String,
        /// What is wrong
        message: String,
        /// Field path, e.g. `spec.bucket`
        field: Option<String>,
    },

    /// Creation did not complete before the deadline
    #[error("{resource} did not become active within {elapsed:?}")]
    DeadlineExceeded {
        /// Resource being created
        resource: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// A record cannot be removed while it carries a finalizer
    #[error("{resource} still carries finalizer {finalizer}")]
    FinalizerPresent {
        /// Record that was asked to be removed
        resource: String,
        /// Finalizer blocking removal
        finalizer: String,
    },

    /// No record is tracked under the given key
    #[error("record not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid controller configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violated inside the controller
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong
        message: String,
        /// Where it went wrong
        context: String,
    },
}

impl Error {
    /// Wrap a gateway error with the resource and operation it came from
    pub fn gateway(
        resource: impl Into<String>,
        operation: &'static str,
        source: GatewayError,
    ) -> Self {
        Self::Gateway {
            resource: resource.into(),
            operation,
            source,
        }
    }

    /// Create a validation error for a resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a specific field
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a deadline exceeded error
    pub fn deadline_exceeded(resource: impl Into<String>, elapsed: Duration) -> Self {
        Self::DeadlineExceeded {
            resource: resource.into(),
            elapsed,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error with the location it was raised from
    pub fn internal(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Taxonomy kind of this error, if it has one
    ///
    /// Store, config and internal errors never reach a condition and have
    /// no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Gateway { source, .. } => Some(source.kind()),
            Self::Validation { .. } => Some(ErrorKind::Validation),
            Self::DeadlineExceeded { .. } => Some(ErrorKind::DeadlineExceeded),
            Self::NotFound(_) => Some(ErrorKind::NotFound),
            _ => None,
        }
    }

    /// Returns true if retrying the failed step may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(|k| k.is_retryable())
    }

    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Gateway { source, .. } => source.reason(),
            Self::FinalizerPresent { .. } => "FinalizerPresent",
            _ => self.kind().map(|k| k.reason()).unwrap_or("InternalError"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
