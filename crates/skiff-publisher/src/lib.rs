//! Skiff publisher pipeline
//!
//! The shipping half of the agent: the spooler batches harvested events,
//! the publisher ships batches over the transport and tracks
//! acknowledgements, and the registrar records which events the server
//! has durably accepted.
//!
//! # Delivery guarantees
//!
//! - **At-least-once**: every payload stays in memory until the server
//!   acknowledges all of its events; reconnects retransmit everything
//!   still pending, in the original send order.
//! - **In-order registrar notifications**: acknowledgements may arrive
//!   out of order (a receiver pool acks independently), but the registrar
//!   only ever sees a contiguous prefix of the input stream, so persisted
//!   progress never skips an unacknowledged region.
//! - **Bounded memory**: at most 100 payloads are in flight; wire frames
//!   of partially acked payloads are freed eagerly and regenerated only
//!   if a retransmission needs them.

mod error;
mod payload;
mod pending;
mod publisher;
mod registrar;
mod spool;

pub use error::PublishError;
pub use payload::{AckProgress, PendingPayload};
pub use pending::PendingQueue;
pub use publisher::{
    Publisher, PublisherMetrics, PublisherSnapshot, KEEPALIVE_TIMEOUT, MAX_PENDING_PAYLOADS,
};
pub use registrar::{Registrar, RegistrarEvent};
pub use spool::Spooler;
