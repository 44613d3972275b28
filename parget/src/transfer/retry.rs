//! Per-segment retry loop.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::plan::Segment;
use crate::progress::ProgressCounter;

use super::transport::SegmentSource;
use super::worker::{transfer, TransferFailure};
use super::TransferError;

/// Attempts that make no progress before a segment is abandoned.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Pause between attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Retry parameters, injectable so tests run without real backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_consecutive_errors: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
            backoff: RETRY_BACKOFF,
        }
    }
}

/// A segment the retry loop could not finish.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Too many attempts in a row failed without any bytes arriving.
    #[error("giving up after {attempts} consecutive failed attempts: {source}")]
    Exhausted {
        attempts: u32,
        source: TransferError,
    },

    /// An unbounded segment failed mid-stream. With no known end offset a
    /// partial part file cannot be trusted, so it was removed.
    #[error("stream of unknown length failed and cannot be resumed: {source}")]
    Unresumable { source: TransferError },
}

/// Drive `segment` to completion, re-running the worker after failures.
///
/// An attempt that moves bytes resets the error counter; only consecutive
/// zero-progress failures count against the budget. A bounded attempt ending
/// early (origin closed the stream) is treated the same way as an error.
/// Returns the total bytes this call wrote to the part file.
pub fn run_segment(
    source: &dyn SegmentSource,
    segment: &Segment,
    part_path: &Path,
    progress: &ProgressCounter,
    policy: &RetryPolicy,
) -> Result<u64, RetryError> {
    let mut consecutive_errors = 0u32;
    let mut total = 0u64;
    loop {
        let failure = match transfer(source, segment, part_path, progress) {
            Ok(copied) => {
                total += copied;
                if segment_complete(segment, part_path) {
                    return Ok(total);
                }
                TransferFailure {
                    copied,
                    source: TransferError::Protocol(
                        "origin closed the stream before the segment was complete".to_string(),
                    ),
                }
            }
            Err(failure) => {
                total += failure.copied;
                failure
            }
        };

        if segment.is_unbounded() {
            // No end offset means no way to verify a partial part file.
            let _ = std::fs::remove_file(part_path);
            return Err(RetryError::Unresumable {
                source: failure.source,
            });
        }

        if failure.copied > 0 {
            consecutive_errors = 0;
        } else {
            consecutive_errors += 1;
        }
        if consecutive_errors > policy.max_consecutive_errors {
            return Err(RetryError::Exhausted {
                attempts: consecutive_errors,
                source: failure.source,
            });
        }
        warn!(
            index = segment.index,
            consecutive_errors,
            error = %failure.source,
            "segment attempt failed, retrying"
        );
        std::thread::sleep(policy.backoff);
    }
}

fn segment_complete(segment: &Segment, part_path: &Path) -> bool {
    match segment.len() {
        None => true,
        Some(len) => std::fs::metadata(part_path)
            .map(|meta| meta.len() >= len)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MockSource;
    use tempfile::tempdir;

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
            backoff: Duration::ZERO,
        }
    }

    fn segment(start: u64, end: Option<u64>) -> Segment {
        Segment {
            index: 0,
            start,
            end,
        }
    }

    #[test]
    fn test_run_segment_first_attempt_succeeds() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("p");
        let data: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let source = MockSource::new(data.clone());
        let progress = ProgressCounter::new();

        let total =
            run_segment(&source, &segment(0, Some(500)), &part, &progress, &no_backoff()).unwrap();
        assert_eq!(total, 500);
        assert_eq!(std::fs::read(&part).unwrap(), data);
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_run_segment_retries_failed_opens() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("p");
        let data = vec![9u8; 300];
        let source = MockSource::failing(data.clone(), 3);
        let progress = ProgressCounter::new();

        let total =
            run_segment(&source, &segment(0, Some(300)), &part, &progress, &no_backoff()).unwrap();
        assert_eq!(total, 300);
        assert_eq!(source.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_run_segment_exhausts_error_budget() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("p");
        let source = MockSource::failing(vec![1u8; 100], u32::MAX);
        let progress = ProgressCounter::new();

        match run_segment(&source, &segment(0, Some(100)), &part, &progress, &no_backoff()) {
            Err(RetryError::Exhausted { attempts, .. }) => {
                assert_eq!(attempts, MAX_CONSECUTIVE_ERRORS + 1);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(
            source.calls.lock().unwrap().len(),
            MAX_CONSECUTIVE_ERRORS as usize + 1
        );
    }

    #[test]
    fn test_run_segment_truncated_stream_resumes_where_it_stopped() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("p");
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let source = MockSource::truncating(data.clone(), 400);
        let progress = ProgressCounter::new();

        let total =
            run_segment(&source, &segment(0, Some(1000)), &part, &progress, &no_backoff()).unwrap();
        assert_eq!(total, 1000);
        assert_eq!(std::fs::read(&part).unwrap(), data);
        // 400-byte slices: attempts resume at 0, 400, 800.
        assert_eq!(
            *source.calls.lock().unwrap(),
            vec![Some((0, 999)), Some((400, 999)), Some((800, 999))]
        );
        assert_eq!(progress.get(), 1000);
    }

    #[test]
    fn test_run_segment_unbounded_failure_removes_part() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("p");
        let source = MockSource::failing(vec![0u8; 100], u32::MAX);
        let progress = ProgressCounter::new();

        match run_segment(&source, &segment(0, None), &part, &progress, &no_backoff()) {
            Err(RetryError::Unresumable { .. }) => {}
            other => panic!("expected Unresumable, got {other:?}"),
        }
        assert!(!part.exists());
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_run_segment_respects_custom_budget() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("p");
        let source = MockSource::failing(vec![0u8; 100], u32::MAX);
        let progress = ProgressCounter::new();
        let policy = RetryPolicy {
            max_consecutive_errors: 2,
            backoff: Duration::ZERO,
        };

        match run_segment(&source, &segment(0, Some(100)), &part, &progress, &policy) {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(source.calls.lock().unwrap().len(), 3);
    }
}
