//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error - no servers configured
    #[error("network section has no servers - at least one 'host:port' entry is required")]
    NoServers,

    /// Validation error - malformed server address
    #[error("invalid server address '{address}': expected 'host:port'")]
    InvalidServer {
        /// The offending entry
        address: String,
    },

    /// Validation error - required field missing for the selected transport
    #[error("'{transport}' transport requires '{field}' to be set")]
    MissingField {
        /// Transport name
        transport: &'static str,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - option not supported by the selected transport
    #[error("'{transport}' transport does not support '{field}'")]
    UnsupportedField {
        /// Transport name
        transport: &'static str,
        /// The rejected field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("invalid {field}: {message}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create an InvalidServer error
    pub fn invalid_server(address: impl Into<String>) -> Self {
        Self::InvalidServer {
            address: address.into(),
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
