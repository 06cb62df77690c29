use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config file not found at: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Config file is not a valid JSON object: {0}")]
    InvalidFile(String),

    #[error("Missing required config key `{0}`")]
    MissingRequiredKey(String),

    #[error("Invalid value for config key `{key}`: expected {expected}")]
    InvalidValue { key: String, expected: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, expected: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            expected: expected.to_string(),
        }
    }
}
