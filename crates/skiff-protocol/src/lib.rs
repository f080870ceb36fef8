//! Skiff wire protocol
//!
//! The shipping protocol is a framed message exchange over a single
//! connection. Every message is `signature[4] || length[4, big-endian] ||
//! body`. The client sends `JDAT` data frames and `PING` probes; the
//! server answers with `ACKN` acknowledgements and `PONG`.
//!
//! A `JDAT` body is a 16-byte nonce followed by a zlib stream of
//! length-prefixed JSON event records. An `ACKN` body is the echoed nonce
//! followed by a cumulative 4-byte sequence counting how many events of
//! that frame the server has durably accepted.

mod error;
mod event;
mod frame;
mod jdat;

pub use error::ProtocolError;
pub use event::Event;
pub use frame::{read_frame, write_frame, Ack, Frame};
pub use jdat::encode_jdat_body;

/// Frame signature: client data frame
pub const SIG_JDAT: [u8; 4] = *b"JDAT";

/// Frame signature: client liveness probe
pub const SIG_PING: [u8; 4] = *b"PING";

/// Frame signature: server liveness reply
pub const SIG_PONG: [u8; 4] = *b"PONG";

/// Frame signature: server acknowledgement
pub const SIG_ACKN: [u8; 4] = *b"ACKN";

/// Nonce identifying an in-flight data frame
pub type Nonce = [u8; 16];

/// Nonce length in bytes
pub const NONCE_LEN: usize = 16;

/// ACKN body length: nonce plus 4-byte sequence
pub const ACK_LEN: usize = NONCE_LEN + 4;

/// Largest inbound frame body accepted before the connection is
/// considered corrupt. Server messages are tiny; anything larger means a
/// framing desync.
pub const MAX_INBOUND_BODY: usize = 1024 * 1024;
