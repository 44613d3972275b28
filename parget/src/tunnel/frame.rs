//! Length-prefixed frame codec for the jump-host control channel.
//!
//! A frame is one length byte followed by that many payload bytes, so a
//! payload can never exceed [`MAX_FRAME_LEN`]. Status bytes are a degenerate
//! single-byte exchange outside the framing. Every read and write runs under
//! a deadline so a stalled jump host cannot hang the handshake; the deadline
//! is cleared again before the stream is handed over for raw relaying.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use super::TunnelError;

/// Largest payload a single frame can carry.
pub const MAX_FRAME_LEN: usize = 255;

/// Deadline applied to each frame or status-byte exchange.
pub const FRAME_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Write one frame. Fails with [`TunnelError::FrameTooLong`] before touching
/// the stream if the payload does not fit.
pub fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), TunnelError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(TunnelError::FrameTooLong(payload.len()));
    }
    with_deadline(stream, |stream| {
        stream.write_all(&[payload.len() as u8])?;
        stream.write_all(payload)?;
        stream.flush()
    })?;
    Ok(())
}

/// Read one frame and return its payload. An empty frame yields an empty
/// vector.
pub fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, TunnelError> {
    let payload = with_deadline(stream, |stream| {
        let mut len = [0u8; 1];
        stream.read_exact(&mut len)?;
        let mut payload = vec![0u8; len[0] as usize];
        stream.read_exact(&mut payload)?;
        Ok(payload)
    })?;
    Ok(payload)
}

/// Read a single status byte.
pub fn read_status(stream: &mut TcpStream) -> Result<u8, TunnelError> {
    let status = with_deadline(stream, |stream| {
        let mut status = [0u8; 1];
        stream.read_exact(&mut status)?;
        Ok(status[0])
    })?;
    Ok(status)
}

/// Write a single status byte.
pub fn write_status(stream: &mut TcpStream, status: u8) -> Result<(), TunnelError> {
    with_deadline(stream, |stream| {
        stream.write_all(&[status])?;
        stream.flush()
    })?;
    Ok(())
}

/// Run `op` with [`FRAME_IO_TIMEOUT`] applied to the stream, then clear the
/// timeouts again whether or not `op` succeeded. The relay phase after the
/// handshake must not inherit a deadline.
fn with_deadline<T>(
    stream: &mut TcpStream,
    op: impl FnOnce(&mut TcpStream) -> io::Result<T>,
) -> io::Result<T> {
    stream.set_read_timeout(Some(FRAME_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(FRAME_IO_TIMEOUT))?;
    let result = op(stream);
    stream.set_read_timeout(None)?;
    stream.set_write_timeout(None)?;
    result
}
