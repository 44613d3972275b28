//! Byte-range planning for segmented downloads.
//!
//! The planner partitions the resource's total length into contiguous,
//! non-overlapping segments. Segments use exclusive end offsets internally;
//! the inclusive form required by the HTTP `Range` header is produced by
//! [`Segment::http_range`].

use std::path::{Path, PathBuf};

/// Resources smaller than this are always downloaded as a single segment;
/// the parallelism overhead is not worth it (10 KiB).
pub const SMALL_FILE_THRESHOLD: u64 = 10 * 1024;

/// One contiguous byte range of the resource, transferred and retried
/// independently of its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the merge order.
    pub index: usize,
    /// First byte offset, inclusive.
    pub start: u64,
    /// End offset, exclusive. `None` marks an unbounded segment: the total
    /// length is unknown, the worker streams until the peer closes, and
    /// resume is not permitted.
    pub end: Option<u64>,
}

impl Segment {
    /// Segment length in bytes; `None` when unbounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    /// True for a bounded segment covering zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// True when the total length is unknown and the segment has no end.
    pub fn is_unbounded(&self) -> bool {
        self.end.is_none()
    }

    /// Bytes still missing once `offset` bytes are already on disk.
    pub fn remaining(&self, offset: u64) -> Option<u64> {
        self.len().map(|len| len.saturating_sub(offset))
    }

    /// Inclusive wire range for the `Range` header, given a resume offset.
    ///
    /// `None` when the segment is unbounded (no header is sent) or nothing
    /// remains to request.
    pub fn http_range(&self, offset: u64) -> Option<(u64, u64)> {
        match self.end {
            Some(end) if self.start + offset < end => Some((self.start + offset, end - 1)),
            _ => None,
        }
    }
}

/// Partition `total_len` bytes into at most `requested` segments.
///
/// Guarantees: segments are contiguous and non-overlapping, the first starts
/// at 0, the last ends at `total_len`, and their union covers every byte
/// exactly once. The final segment absorbs the integer-division remainder.
/// An unknown length yields one unbounded segment.
pub fn plan_segments(total_len: Option<u64>, requested: u64) -> Vec<Segment> {
    let Some(len) = total_len else {
        return vec![Segment {
            index: 0,
            start: 0,
            end: None,
        }];
    };
    if len == 0 {
        return vec![Segment {
            index: 0,
            start: 0,
            end: Some(0),
        }];
    }

    let count = if len < SMALL_FILE_THRESHOLD {
        1
    } else {
        requested.max(1).min(len)
    };
    let seg_size = len / count;

    let mut segments = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * seg_size;
        let end = if i == count - 1 { len } else { start + seg_size };
        segments.push(Segment {
            index: i as usize,
            start,
            end: Some(end),
        });
    }
    segments
}

/// Part-file path for one segment: `<output>_part_NNNN` with a zero-padded
/// index. The presence and size of these files is the only on-disk resume
/// state.
pub fn part_file_path(output: &Path, index: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!("_part_{index:04}"));
    PathBuf::from(name)
}
