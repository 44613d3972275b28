//! Jump-host tunneling.
//!
//! A tunneled connection starts with a framed handshake: the jump host sends
//! a random challenge, the client answers with the SHA-1 digest of the
//! challenge concatenated with the shared secret, and only then names the
//! destination it wants to reach. Each step is gated by a status byte; any
//! non-zero status is followed by an error frame explaining the refusal.
//! After a successful handshake the stream carries raw bytes in both
//! directions with no further framing.

use std::io;

use thiserror::Error;

pub mod frame;

mod dialer;

pub use dialer::{challenge_response, TunnelDialer};

/// Errors from the framed handshake with a jump host.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// A payload too large for the one-byte length prefix.
    #[error("frame payload of {0} bytes exceeds the 255-byte limit")]
    FrameTooLong(usize),

    /// The jump host refused the challenge response.
    #[error("jump host rejected authentication: {0}")]
    AuthRejected(String),

    /// The jump host could not or would not reach the destination.
    #[error("jump host could not connect to {destination}: {reason}")]
    ConnectRejected {
        destination: String,
        reason: String,
    },

    /// Socket-level failure, including handshake deadline expiry.
    #[error(transparent)]
    Io(#[from] io::Error),
}
