//! Configuration loading via `ortho-config`.
//!
//! [`DriverConfig`] carries the settings of the orchestration core itself;
//! [`ScalewayConfig`] carries the credentials and defaults of the Scaleway
//! facade. Both merge defaults, configuration files, environment variables,
//! and CLI flags in that order of precedence.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::staging::StagingArea;
use crate::task::{DEFAULT_QUEUE_DEPTH, DEFAULT_WORKER_COUNT};

/// Default root of the image staging area.
pub const DEFAULT_STAGING_PATH: &str = "/tmp/hostdrive";

/// Settings of the task runner, staging area and logging.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTDRIVE",
    discovery(
        app_name = "hostdrive",
        env_var = "HOSTDRIVE_CONFIG_PATH",
        config_file_name = "hostdrive.toml",
        dotfile_name = ".hostdrive.toml",
        project_file_name = "hostdrive.toml"
    )
)]
pub struct DriverConfig {
    /// Directory below which image exports are staged.
    #[ortho_config(default = DEFAULT_STAGING_PATH.to_owned())]
    pub staging_path: String,
    /// Number of background workers draining the task queue.
    #[ortho_config(default = DEFAULT_WORKER_COUNT)]
    pub worker_count: usize,
    /// Capacity of the background task queue.
    #[ortho_config(default = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_filter: String,
}

impl DriverConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("hostdrive")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the values the runtime cannot work without.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an empty staging path and
    /// [`ConfigError::Invalid`] for a zero worker count or queue depth.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.staging_path,
            &FieldMetadata::new(
                "staging directory",
                "HOSTDRIVE_STAGING_PATH",
                "staging_path",
                "hostdrive",
            ),
        )?;
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(String::from(
                "worker_count must be at least 1: set HOSTDRIVE_WORKER_COUNT",
            )));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid(String::from(
                "queue_depth must be at least 1: set HOSTDRIVE_QUEUE_DEPTH",
            )));
        }
        Ok(())
    }

    /// Staging area rooted at the configured path.
    #[must_use]
    pub fn staging_area(&self) -> StagingArea {
        StagingArea::new(Utf8PathBuf::from(self.staging_path.trim()))
    }
}

/// Scaleway specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// CPU architecture used when a request does not name one.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Object Storage bucket receiving snapshot exports. Image downloads are
    /// unavailable without it.
    pub export_bucket: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in hostdrive.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("hostdrive")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_architecture,
            &FieldMetadata::new(
                "CPU architecture",
                "SCW_DEFAULT_ARCHITECTURE",
                "default_architecture",
                "scaleway",
            ),
        )?;
        if let Some(bucket) = &self.export_bucket {
            require_field(
                bucket,
                &FieldMetadata::new(
                    "export bucket",
                    "SCW_EXPORT_BUCKET",
                    "export_bucket",
                    "scaleway",
                ),
            )?;
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value the runtime cannot use.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn scaleway() -> ScalewayConfig {
        ScalewayConfig {
            secret_key: String::from("secret"),
            default_organization_id: None,
            default_project_id: String::from("project"),
            default_zone: String::from("fr-par-1"),
            default_architecture: String::from("x86_64"),
            export_bucket: None,
        }
    }

    fn driver() -> DriverConfig {
        DriverConfig {
            staging_path: String::from(DEFAULT_STAGING_PATH),
            worker_count: DEFAULT_WORKER_COUNT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            log_filter: String::from("info"),
        }
    }

    #[test]
    fn complete_configs_validate() {
        assert_eq!(scaleway().validate(), Ok(()));
        assert_eq!(driver().validate(), Ok(()));
    }

    #[rstest]
    #[case::secret(ScalewayConfig { secret_key: String::new(), ..scaleway() }, "SCW_SECRET_KEY")]
    #[case::project(
        ScalewayConfig { default_project_id: String::from(" "), ..scaleway() },
        "SCW_DEFAULT_PROJECT_ID"
    )]
    #[case::bucket(
        ScalewayConfig { export_bucket: Some(String::new()), ..scaleway() },
        "SCW_EXPORT_BUCKET"
    )]
    fn missing_fields_name_their_env_var(#[case] config: ScalewayConfig, #[case] env_var: &str) {
        let err = config.validate().expect_err("field is missing");
        assert!(matches!(err, ConfigError::MissingField(_)));
        assert!(err.to_string().contains(env_var), "{err}");
    }

    #[test]
    fn zero_workers_are_rejected() {
        let config = DriverConfig {
            worker_count: 0,
            ..driver()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn staging_area_uses_trimmed_path() {
        let config = DriverConfig {
            staging_path: String::from(" /var/tmp/exports "),
            ..driver()
        };
        assert_eq!(config.staging_area().root().as_str(), "/var/tmp/exports");
    }
}
