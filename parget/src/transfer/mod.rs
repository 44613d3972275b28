//! Segment transfer: transports, the copy worker, and the retry loop.
//!
//! A [`SegmentSource`](transport::SegmentSource) opens a byte stream for one
//! ranged request, the worker appends that stream to the segment's part file,
//! and the retry layer re-runs the worker from the part file's current size
//! until the segment is complete or the error budget is spent.

use std::io;

use thiserror::Error;

use crate::tunnel::TunnelError;

mod retry;
mod transport;
mod worker;

pub use retry::{run_segment, RetryError, RetryPolicy, MAX_CONSECUTIVE_ERRORS, RETRY_BACKOFF};
pub use transport::{header_pairs, DirectSource, SegmentSource, TunnelSource};
pub use worker::{transfer, TransferFailure, COPY_BUFFER_SIZE};

#[cfg(test)]
pub(crate) use transport::mock::MockSource;

/// Errors from a single transfer attempt. All of these are retryable for a
/// bounded segment; the retry layer decides what to do with them.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP request could not be sent or its response not read.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// The origin answered with a status other than 200 or 206.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// Establishing the tunneled connection failed.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// The part file accepted fewer bytes than were handed to it.
    #[error("short write to part file")]
    ShortWrite,

    /// Reading the response body or writing the part file failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The response violated the protocol (bad status line, wrong scheme).
    #[error("{0}")]
    Protocol(String),
}
