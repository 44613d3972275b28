//! Single transfer attempt for one segment.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::plan::Segment;
use crate::progress::ProgressCounter;

use super::transport::SegmentSource;
use super::TransferError;

/// Copy buffer size for part-file writes (32 KiB).
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// A failed attempt, with the number of bytes that still made it to disk.
///
/// The retry layer uses `copied` to distinguish a dead connection from one
/// that was making progress before it dropped.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransferFailure {
    pub copied: u64,
    pub source: TransferError,
}

/// Run one transfer attempt for `segment`, appending to its part file.
///
/// The attempt resumes from the part file's current size; a part file that
/// is somehow longer than its segment is truncated back first. The part
/// file is created before anything else so that even a zero-length segment
/// leaves one behind for the merge. Returns the bytes copied by this
/// attempt.
pub fn transfer(
    source: &dyn SegmentSource,
    segment: &Segment,
    part_path: &Path,
    progress: &ProgressCounter,
) -> Result<u64, TransferFailure> {
    let mut part = OpenOptions::new()
        .create(true)
        .append(true)
        .open(part_path)
        .map_err(|err| TransferFailure {
            copied: 0,
            source: err.into(),
        })?;
    let mut offset = part
        .metadata()
        .map(|meta| meta.len())
        .map_err(|err| TransferFailure {
            copied: 0,
            source: err.into(),
        })?;
    // A part file longer than its segment would feed foreign bytes into the
    // merge; cut it back to the segment length before resuming.
    if let Some(len) = segment.len() {
        if offset > len {
            part.set_len(len).map_err(|err| TransferFailure {
                copied: 0,
                source: err.into(),
            })?;
            offset = len;
        }
    }

    let remaining = segment.remaining(offset);
    if remaining == Some(0) {
        debug!(index = segment.index, offset, "segment already complete");
        return Ok(0);
    }

    let mut body = source
        .open(segment.http_range(offset))
        .map_err(|source| TransferFailure { copied: 0, source })?;

    let mut copied = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                return Err(TransferFailure {
                    copied,
                    source: err.into(),
                })
            }
        };
        // Origins that ignore the range request serve the whole resource;
        // never write past the segment's end.
        let read = match remaining {
            Some(remaining) => read.min((remaining - copied) as usize),
            None => read,
        };
        let written = match part.write(&buf[..read]) {
            Ok(written) => written,
            Err(err) => {
                return Err(TransferFailure {
                    copied,
                    source: err.into(),
                })
            }
        };
        if written < read {
            return Err(TransferFailure {
                copied: copied + written as u64,
                source: TransferError::ShortWrite,
            });
        }
        copied += written as u64;
        progress.add(written as u64);
        if let Some(remaining) = remaining {
            if copied >= remaining {
                break;
            }
        }
    }
    debug!(index = segment.index, offset, copied, "attempt finished");
    Ok(copied)
}
