//! Frame codec
//!
//! Every message on the connection is `signature[4] || length[4,
//! big-endian] || body`. The reader enforces `MAX_INBOUND_BODY` so a
//! desynced or hostile peer cannot make us buffer an arbitrary allocation.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::{ACK_LEN, MAX_INBOUND_BODY, NONCE_LEN};

/// One decoded frame: signature plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 4-byte ASCII tag (`JDAT`, `PING`, `PONG`, `ACKN`)
    pub signature: [u8; 4],

    /// Frame body; may be empty
    pub body: Bytes,
}

/// A parsed ACKN body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Nonce of the acknowledged data frame
    pub nonce: [u8; NONCE_LEN],

    /// Cumulative count of events accepted from that frame
    pub sequence: u32,
}

impl Ack {
    /// Parse an ACKN body: `nonce[16] || sequence[4, big-endian]`
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() != ACK_LEN {
            return Err(ProtocolError::AckLength {
                expected: ACK_LEN,
                actual: body.len(),
            });
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&body[..NONCE_LEN]);
        let sequence = u32::from_be_bytes([body[16], body[17], body[18], body[19]]);

        Ok(Self { nonce, sequence })
    }

    /// Encode to an ACKN body (used by test harnesses)
    pub fn to_bytes(&self) -> [u8; ACK_LEN] {
        let mut out = [0u8; ACK_LEN];
        out[..NONCE_LEN].copy_from_slice(&self.nonce);
        out[NONCE_LEN..].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }
}

/// Read one frame from the connection
///
/// # Errors
///
/// Returns an error on I/O failure (including EOF mid-frame) or when the
/// declared body length exceeds `MAX_INBOUND_BODY`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await?;

    let mut signature = [0u8; 4];
    signature.copy_from_slice(&header[..4]);
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    if length > MAX_INBOUND_BODY {
        return Err(ProtocolError::body_too_large(length));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    Ok(Frame {
        signature,
        body: Bytes::from(body),
    })
}

/// Write one frame and flush it
pub async fn write_frame<W>(
    writer: &mut W,
    signature: [u8; 4],
    body: &[u8],
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&signature).await?;
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
