//! Configuration error types.

use std::io;

use thiserror::Error;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Failed to parse YAML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// nginx-rtmp and Icecast servers need an HTTP endpoint.
    #[error("for nginx-rtmp or icecast servers, the url setting is required")]
    MissingServerUrl,

    /// nginx-rtmp servers need an application name.
    #[error("for nginx-rtmp servers, the app setting is required")]
    MissingServerApp,

    /// The stat-page XPath expression must not be empty.
    #[error("the xpath setting is required")]
    MissingXpath,

    /// The app name is substituted into the XPath expression unquoted.
    #[error("the app setting must not contain quotes")]
    AppContainsQuotes,

    /// The XPath expression did not compile.
    #[error("invalid xpath expression: {0}")]
    InvalidXpath(String),

    /// Buffer counts must be positive.
    #[error("{section}.buffer_count must be at least 1")]
    InvalidBufferCount {
        /// Config section the bad value came from.
        section: &'static str,
    },

    /// Buffer sizes must be positive.
    #[error("source_buffer.buffer_size must be at least 1")]
    InvalidBufferSize,
}
