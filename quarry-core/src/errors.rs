use std::io;

use thiserror::Error;

/// Result type used across the Quarry core crate.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Canonical error representation shared by all services.
#[derive(Debug, Error)]
pub enum QuarryError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("general error: {0}")]
    GeneralError(String),
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::DeserializationError(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {key}: {source}")]
    InvalidEnvVar {
        key: &'static str,
        #[source]
        source: std::env::VarError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for QuarryError {
    fn from(value: ConfigError) -> Self {
        QuarryError::ConfigError(value.to_string())
    }
}
