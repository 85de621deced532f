//! Error types for configuration loading and logging setup.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving, reading, merging or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration path does not exist.
    #[error("config path not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed part way through.
    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("unsupported config format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A command-line argument handed to the flag source is not a `--flag`.
    #[error("invalid flag `{0}`: expected --key, --key=value or --key value")]
    InvalidFlag(String),

    /// The requested key exists but does not hold a mapping.
    #[error("`{key}` is not a configuration section")]
    NotASection { key: String },

    #[error("failed to decode `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn parse(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while initializing the logging sink.
#[derive(Debug, Error)]
pub enum LogError {
    /// The `logging` section does not match the expected shape.
    #[error("invalid logging config: {0}")]
    InvalidConfig(#[source] ConfigError),

    #[error("invalid log level `{level}`: {message}")]
    Filter { level: String, message: String },

    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),

    /// The installed subscriber rejected new settings.
    #[error("failed to reconfigure log subscriber: {0}")]
    Reload(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
