//! Error taxonomy shared by the host drivers and the task runner.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::remote::RemoteError;
use crate::staging::StagingError;
use crate::store::StoreError;
use crate::task::TaskError;

/// Errors raised by host driver operations.
///
/// Only [`DriverError::Validation`] and the synchronous precondition
/// failures are returned directly from a driver call; everything else is
/// delivered through the task completion.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when a request is rejected before any remote call.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Raised when a remote or local resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind (for example `disk` or `storage cache`).
        kind: String,
        /// Identifier used for the lookup.
        id: String,
    },
    /// Wrapper for facade failures other than "not found".
    #[error("remote operation failed: {0}")]
    Remote(RemoteError),
    /// Wrapper for disk record store failures.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Wrapper for cached-image registry failures.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Wrapper for task runner failures.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// Wrapper for local staging area failures.
    #[error(transparent)]
    Staging(#[from] StagingError),
}

impl DriverError {
    /// Builds a validation error from any displayable message.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Builds a not-found error for the given resource.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<RemoteError> for DriverError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Remote(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_not_found_maps_to_driver_not_found() {
        let err = DriverError::from(RemoteError::not_found("disk", "vol-1"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "disk vol-1 not found");
    }

    #[test]
    fn remote_operation_failure_is_wrapped() {
        let err = DriverError::from(RemoteError::operation("create_disk", "quota exceeded"));
        assert_eq!(
            err.to_string(),
            "remote operation failed: create_disk failed: quota exceeded"
        );
    }
}
