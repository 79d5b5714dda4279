//! Core error types for nimbus loading operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// The standard Result type for nimbus core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for configuration and snapshot loading.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("JSON parse error in '{path}': {reason}")]
    JsonParseFailed { path: PathBuf, reason: String },

    #[error("YAML parse error in '{path}': {reason}")]
    YamlParseFailed { path: PathBuf, reason: String },

    // Semantic errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_failed_names_path() {
        let err = Error::file_read_failed("/tmp/serverless.yml", "permission denied");
        let text = err.to_string();
        assert!(text.contains("/tmp/serverless.yml"));
        assert!(text.contains("permission denied"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("service name is empty");
        assert_eq!(
            err.to_string(),
            "invalid configuration: service name is empty"
        );
    }
}
