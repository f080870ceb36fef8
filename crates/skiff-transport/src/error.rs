//! Transport error types

use std::io;
use thiserror::Error;

use skiff_protocol::ProtocolError;

/// Errors from establishing or using a connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// No servers to connect to
    #[error("no servers configured")]
    NoServers,

    /// TCP connect failed
    #[error("connection failed to {server}: {source}")]
    ConnectFailed {
        /// Target `host:port`
        server: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Connect or handshake did not complete in time
    #[error("connection to {server} timed out")]
    ConnectTimeout {
        /// Target `host:port`
        server: String,
    },

    /// Server address could not be used as a TLS server name
    #[error("invalid TLS server name '{server}'")]
    InvalidServerName {
        /// Target host
        server: String,
    },

    /// Certificate or key material could not be loaded
    #[error("failed to load '{path}': {message}")]
    Certificate {
        /// File that failed
        path: String,
        /// What went wrong
        message: String,
    },

    /// TLS handshake failed
    #[error("TLS handshake with {server} failed: {source}")]
    Handshake {
        /// Target `host:port`
        server: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Frame codec failure on this connection
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection is gone; writes can no longer be queued
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Create a Certificate error
    pub fn certificate(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Certificate {
            path: path.into(),
            message: message.into(),
        }
    }
}
