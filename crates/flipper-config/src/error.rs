//! Failures raised while loading and validating `flipper.yaml`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("configuration file is unreadable")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration file was not valid YAML for the settings model.
    #[error("configuration file does not match the settings model")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A setting failed validation.
    #[error("configuration setting rejected")]
    InvalidField {
        /// Dotted setting name.
        field: &'static str,
        /// Rejected value, when printable.
        value: Option<String>,
        /// Stable reason code.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &'static str,
        value: Option<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            field,
            value,
            reason,
        }
    }
}
