//! Transport layer for the shipping protocol
//!
//! The publisher drives its state machine through the narrow [`Transport`]
//! contract: a blocking `connect` that yields a [`Connection`], and on the
//! connection a credit channel (one token whenever the transport is ready
//! to accept another write), a combined incoming channel carrying decoded
//! frames and terminal errors, an async `write`, and an idempotent
//! `disconnect`.
//!
//! The split matters: the publisher must never block on
//! "send-and-wait-for-ack" semantics, because acknowledgements arrive out
//! of order and interleave with keepalive traffic. Credit and incoming are
//! therefore independent channels the publisher multiplexes over.

mod error;
mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use error::TransportError;
pub use tcp::TcpTransport;

use skiff_protocol::Frame;

/// One item on the incoming channel: a decoded frame, or the error that
/// ended the connection
#[derive(Debug)]
pub enum Incoming {
    /// A decoded server frame
    Frame(Frame),
    /// Terminal read or write failure; no further frames will arrive
    Error(TransportError),
}

/// A connection-oriented transport able to (re)connect to a server
#[async_trait]
pub trait Transport: Send {
    /// Establish a connection, blocking until it is up or failed
    ///
    /// Each call may target a different server when several are
    /// configured.
    async fn connect(&mut self) -> Result<Connection, TransportError>;
}

/// An established connection
///
/// Dropping the connection tears it down; [`Connection::disconnect`] does
/// the same explicitly and may be called more than once.
pub struct Connection {
    /// Yields one token whenever the transport will accept another write
    pub credit: mpsc::Receiver<()>,

    /// Decoded frames and the terminal error, in arrival order
    pub incoming: mpsc::Receiver<Incoming>,

    outgoing: mpsc::Sender<(/* signature */ [u8; 4], Bytes)>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Assemble a connection from its channel endpoints
    ///
    /// Used by transport implementations and by test doubles.
    pub fn new(
        credit: mpsc::Receiver<()>,
        incoming: mpsc::Receiver<Incoming>,
        outgoing: mpsc::Sender<([u8; 4], Bytes)>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            credit,
            incoming,
            outgoing,
            tasks,
        }
    }

    /// Queue one frame for sending
    ///
    /// Bodies are reference-counted, so retransmission bookkeeping can
    /// keep its copy without duplicating the bytes.
    pub async fn write(&self, signature: [u8; 4], body: Bytes) -> Result<(), TransportError> {
        self.outgoing
            .send((signature, body))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Tear down the connection and its I/O tasks; idempotent
    pub fn disconnect(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
