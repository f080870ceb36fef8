//! JDAT body encoding
//!
//! A JDAT body is the frame's 16-byte nonce followed by a zlib stream
//! (compression level 3) containing one record per event:
//! `length[4, big-endian] || json[length]`.
//!
//! Level 3 keeps CPU low on busy hosts; the level must not change
//! silently because retransmitted frames are expected to be byte-identical
//! to the original send.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::error::ProtocolError;
use crate::{Event, Nonce};

/// zlib compression level for JDAT bodies
const COMPRESSION_LEVEL: u32 = 3;

/// Encode a JDAT body for the given events
///
/// Stamps each event's `host` field before serializing it, so the frame
/// records the shipping host even when events were harvested earlier.
pub fn encode_jdat_body(
    nonce: &Nonce,
    events: &mut [Event],
    hostname: &str,
) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(NONCE_PLUS_HEADROOM);
    body.extend_from_slice(nonce);

    let mut compressor = ZlibEncoder::new(body, Compression::new(COMPRESSION_LEVEL));
    for event in events.iter_mut() {
        event.set_host(hostname);
        append_record(&mut compressor, event)?;
    }

    Ok(compressor.finish()?)
}

/// Nonce plus a guess at the compressed stream size, to skip the first
/// few buffer growths
const NONCE_PLUS_HEADROOM: usize = 4096;

/// Append one length-prefixed JSON record
///
/// An event that fails to serialize is replaced by the empty object `{}`
/// rather than poisoning the whole frame; the loss is logged here and the
/// remaining events ship normally.
fn append_record<W: Write>(output: &mut W, event: &impl Serialize) -> Result<(), ProtocolError> {
    match serde_json::to_vec(event) {
        Ok(json) => {
            output.write_all(&(json.len() as u32).to_be_bytes())?;
            output.write_all(&json)?;
        }
        Err(error) => {
            tracing::warn!(%error, "event JSON encoding failed, shipping empty record");
            output.write_all(&2u32.to_be_bytes())?;
            output.write_all(b"{}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "jdat_test.rs"]
mod jdat_test;
