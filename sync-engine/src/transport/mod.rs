//! Transport abstraction for lanclip.
//!
//! Every envelope travels on its own TCP connection:
//!
//! ```text
//! sender                         receiver
//!   connect ------------------->  accept
//!   [len: u32 BE][sealed bytes] ->  read frame, dispatch
//!   <------------------- [len: u32 BE][ACK]
//!   close                          close
//! ```
//!
//! The acknowledgement is the same single byte whatever the receiver did
//! with the frame (applied, duplicate, unauthorized or undecryptable), so it
//! reveals nothing about authorization state. Waiting for it is what keeps
//! the chunks of a file transfer in order.

mod mock;
mod tcp;

pub use mock::{MockTransport, SentFrame};
pub use tcp::{FrameHandler, InboundServer, TcpTransport, DEFAULT_ACK_TIMEOUT};

use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted from the network (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Payload of the acknowledgement frame.
pub const ACK: &[u8] = &[0x06];

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Every candidate address failed to connect.
    #[error("could not connect to {peer} ({attempts} addresses tried)")]
    Connect {
        /// Peer name.
        peer: String,
        /// Number of addresses tried.
        attempts: usize,
    },

    /// Connected, but the exchange failed.
    #[error("send failed: {0}")]
    Send(String),

    /// No acknowledgement or frame within the deadline.
    #[error("timed out")]
    Timeout,

    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Announced or actual size.
        size: usize,
        /// Limit in effect.
        limit: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of the transport.
///
/// Implementations deliver one sealed frame to one peer and return once the
/// peer has acknowledged it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `frame` to `peer`, trying `addresses` in order.
    ///
    /// Falls back to the next address only when connecting fails; running
    /// out of addresses yields [`TransportError::Connect`].
    async fn send(
        &self,
        peer: &str,
        addresses: &[SocketAddr],
        frame: &[u8],
    ) -> Result<(), TransportError>;
}

/// Write a length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    // Write 4-byte length prefix
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame of at most `limit` bytes.
///
/// The length is checked before the payload buffer is allocated.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > limit {
        return Err(TransportError::FrameTooLarge { size: len, limit });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
