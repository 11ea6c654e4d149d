//! Error types for the Scaleway facade.

use crate::config::ConfigError;
use crate::remote::RemoteError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised while building the Scaleway facade or resolving images.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

impl ScalewayBackendError {
    /// Converts the error into the facade error of `operation`.
    pub(crate) fn into_remote(self, operation: &str) -> RemoteError {
        match self {
            Self::ImageNotFound { label, .. } => RemoteError::not_found("image", label),
            other => RemoteError::operation(operation, other),
        }
    }
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
