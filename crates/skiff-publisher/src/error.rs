//! Publisher error types

use thiserror::Error;

use skiff_protocol::ProtocolError;
use skiff_transport::TransportError;

/// Errors that end a connection attempt
///
/// Every variant except `RegistrarClosed` is recoverable: the publisher
/// disconnects, waits the reconnect delay, and retransmits everything
/// still pending.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Transport-level failure (connect, read, write)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Frame or payload codec failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Server sent a signature we don't understand
    #[error("unknown message received: {signature:02X?}")]
    UnknownSignature {
        /// The unrecognized 4-byte tag
        signature: [u8; 4],
    },

    /// PONG arrived with a non-empty body
    #[error("PONG message overflow ({0} bytes)")]
    PongOverflow(usize),

    /// PONG arrived without an outstanding PING
    #[error("unexpected PONG received")]
    UnexpectedPong,

    /// No acknowledgement within the network timeout
    #[error("server did not respond within the network timeout")]
    ServerTimeout,

    /// No PONG within the network timeout
    #[error("server did not respond to PING")]
    PingTimeout,

    /// The registrar is gone; acknowledged progress can no longer be
    /// recorded
    #[error("registrar channel closed")]
    RegistrarClosed,
}
