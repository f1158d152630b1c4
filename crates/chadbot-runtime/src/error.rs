//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read or extract the configuration.
    #[error("configuration error: {0}")]
    Extract(#[from] figment::Error),

    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that make broker startup impossible.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The plugin config file could not be loaded.
    #[error(transparent)]
    ConfigStore(#[from] chadbot_broker::ConfigStoreError),

    /// The listen socket could not be bound.
    #[error(transparent)]
    Transport(#[from] chadbot_core::error::TransportError),

    #[error("{0}")]
    Other(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
