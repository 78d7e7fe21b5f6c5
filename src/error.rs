//! Error types for the deckhand provisioning tool.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, state management, the provider API,
//! planning, and apply.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for deckhand.
#[derive(Debug, Error)]
pub enum DeckhandError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A declared variable has no value.
    #[error("Variable '{name}' has no value (set {env_var})")]
    MissingVariable {
        /// Name of the stack variable.
        name: String,
        /// Environment variable that would supply it.
        env_var: String,
    },

    /// An attribute string contains a malformed interpolation.
    #[error("Invalid interpolation in {resource}.{attribute}: {message}")]
    InvalidInterpolation {
        /// Resource holding the attribute.
        resource: String,
        /// Attribute name.
        attribute: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Resource graph construction errors.
///
/// These are raised before any provider call is made.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The declarations contain a dependency cycle.
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Resources participating in the cycle.
        cycle: Vec<String>,
    },

    /// A declaration references something that does not exist.
    #[error("Unresolved reference in {resource}: {reference}")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// The reference as written.
        reference: String,
    },

    /// Two declarations share the same identity.
    #[error("Duplicate resource: {resource}")]
    DuplicateResource {
        /// The duplicated identity.
        resource: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// The lock this process held expired and was taken over or removed.
    #[error("State lock {lock_id} is no longer held by this process")]
    LockLost {
        /// Lock this process acquired.
        lock_id: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// Snapshot belongs to another project or environment.
    #[error("Snapshot belongs to {found}, expected {expected}")]
    ProjectMismatch {
        /// Expected `project/environment`.
        expected: String,
        /// Found `project/environment`.
        found: String,
    },

    /// Resource is not tracked in the snapshot.
    #[error("Resource not in state: {resource}")]
    UnknownResource {
        /// The requested identity.
        resource: String,
    },
}

/// Provider API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The provider refused the request.
    #[error("Provider rejected request: {status} - {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Temporary failure on the provider side (5xx, eventual consistency).
    #[error("Transient provider failure: {status} - {message}")]
    Transient {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Remote object not found.
    #[error("Remote object not found: {kind}/{remote_id}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Remote identifier.
        remote_id: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// A single call exceeded its deadline.
    #[error("Provider call timed out: {message}")]
    Timeout {
        /// Description of the call.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The baseline changed since the snapshot or plan was captured.
    #[error("Plan conflict on {resource}: {message}; run refresh and plan again")]
    Conflict {
        /// Resource (or `state`) that moved.
        resource: String,
        /// What changed.
        message: String,
    },

    /// Saved plan file was written by an incompatible version.
    #[error("Unsupported plan format version: {found}")]
    UnknownPlanVersion {
        /// Version found in the file.
        found: String,
    },
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Some operations failed or were skipped.
    #[error("Apply incomplete: {failed} failed, {skipped} skipped, {succeeded} succeeded")]
    Incomplete {
        /// Operations that succeeded.
        succeeded: usize,
        /// Operations that failed.
        failed: usize,
        /// Operations that were never attempted.
        skipped: usize,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
        /// Last transient error seen.
        last_error: String,
    },

    /// A value needed by the operation is not available.
    #[error("Cannot resolve {reference} for {resource}")]
    Unresolvable {
        /// Resource being applied.
        resource: String,
        /// What could not be resolved.
        reference: String,
    },
}

/// Result type alias for deckhand operations.
pub type Result<T> = std::result::Result<T, DeckhandError>;

impl DeckhandError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay, if applicable.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Provider(e) => e.retry_after(),
            Self::State(StateError::LockFailed { .. }) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(status: u16, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true for rate limiting, eventual-consistency lag and
    /// connectivity failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Transient { .. }
                | Self::NetworkError { .. }
                | Self::Timeout { .. }
        )
    }

    /// Delay the provider asked for, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let rate = DeckhandError::Provider(ProviderError::RateLimited { retry_after_secs: 7 });
        assert!(rate.is_retryable());
        assert_eq!(rate.retry_after(), Some(Duration::from_secs(7)));

        let lag = DeckhandError::Provider(ProviderError::transient(409, "role not yet visible"));
        assert!(lag.is_retryable());
        assert_eq!(lag.retry_after(), None);

        let denied = DeckhandError::Provider(ProviderError::rejected(400, "bad port"));
        assert!(!denied.is_retryable());
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = GraphError::CyclicDependency {
            cycle: vec![String::from("iam_role.a"), String::from("iam_role.b")],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency detected: iam_role.a -> iam_role.b"
        );
    }
}
