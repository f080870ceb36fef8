//! Protocol error types

use std::io;
use thiserror::Error;

/// Errors that can occur when encoding or decoding protocol messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O failure while reading or writing a frame
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Inbound frame body exceeds the protocol maximum
    #[error("frame body of {size} bytes exceeds maximum {max}")]
    BodyTooLarge {
        /// Declared body length
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// ACKN body is not exactly nonce + sequence
    #[error("ACKN message corruption: expected {expected} bytes, got {actual}")]
    AckLength {
        /// Required length
        expected: usize,
        /// Received length
        actual: usize,
    },
}

impl ProtocolError {
    /// Create a BodyTooLarge error
    #[inline]
    pub fn body_too_large(size: usize) -> Self {
        Self::BodyTooLarge {
            size,
            max: crate::MAX_INBOUND_BODY,
        }
    }
}
