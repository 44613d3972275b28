//! Error types for a download run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::probe::ProbeError;
use crate::transfer::RetryError;

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Errors that abort a download run.
///
/// Recoverable conditions are handled inside the retry layer; everything
/// surfacing here ends the run. Part files written so far are left on disk
/// for inspection and manual resume.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The output path already exists; the run never overwrites silently.
    #[error("output file {} already exists, delete it first", .path.display())]
    OutputExists { path: PathBuf },

    /// The metadata probe failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// The transport could not be constructed (bad URL, unsupported scheme,
    /// client build failure).
    #[error("failed to set up transport: {0}")]
    Transport(#[from] crate::transfer::TransferError),

    /// One segment failed past its retry budget or without a resume anchor.
    #[error("segment {index}: {source}")]
    Segment { index: usize, source: RetryError },

    /// A worker thread panicked; the segment's state is unknown.
    #[error("worker thread for segment {index} panicked")]
    WorkerPanic { index: usize },

    /// Copying a part file into the output failed.
    #[error("failed to merge {}: {source}", .path.display())]
    Merge { path: PathBuf, source: io::Error },
}
