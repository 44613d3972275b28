//! Run coordination: one thread per segment, then the merge.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::error::{DownloadError, Result};
use crate::merge::merge_parts;
use crate::plan::{part_file_path, plan_segments, Segment};
use crate::progress::{ProgressCounter, ProgressReporter};
use crate::transfer::{run_segment, RetryPolicy, SegmentSource};

/// One download to perform, already probed and named.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Total resource length; `None` disables segmentation and resume.
    pub total_len: Option<u64>,
    /// Requested segment count.
    pub segments: u64,
    /// Final output path.
    pub output: PathBuf,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Bytes in the merged output file.
    pub bytes_written: u64,
    /// Final progress-counter value: bytes seeded from earlier runs plus
    /// bytes transferred now. Equals `bytes_written` after a clean run.
    pub bytes_observed: u64,
    /// Number of segments the run used.
    pub segments: usize,
}

/// Run `job` with the default retry policy.
pub fn run(job: &DownloadJob, source: Arc<dyn SegmentSource>, quiet: bool) -> Result<DownloadSummary> {
    run_with_policy(job, source, quiet, &RetryPolicy::default())
}

/// Run `job`: plan segments, transfer them concurrently, merge the parts.
///
/// The output path is checked up front so a doomed run makes no requests.
/// All worker threads are joined before any error is returned; when several
/// segments fail, the lowest-indexed failure is reported. Part files from
/// failed or interrupted runs stay on disk and seed the next attempt.
pub fn run_with_policy(
    job: &DownloadJob,
    source: Arc<dyn SegmentSource>,
    quiet: bool,
    policy: &RetryPolicy,
) -> Result<DownloadSummary> {
    if job.output.exists() {
        return Err(DownloadError::OutputExists {
            path: job.output.clone(),
        });
    }

    let segments = plan_segments(job.total_len, job.segments);
    let parts: Vec<PathBuf> = segments
        .iter()
        .map(|segment| part_file_path(&job.output, segment.index))
        .collect();

    let progress = ProgressCounter::new();
    seed_progress(&segments, &parts, &progress);

    let reporter = match job.total_len {
        Some(total) if total > 0 && !quiet => {
            Some(ProgressReporter::start(progress.clone(), total))
        }
        _ => None,
    };
    if job.total_len.is_none() {
        warn!("content length unknown, downloading as a single stream without resume");
    }

    info!(
        output = %job.output.display(),
        segments = segments.len(),
        total_len = ?job.total_len,
        "starting transfer"
    );

    let handles: Vec<_> = segments
        .iter()
        .zip(&parts)
        .map(|(segment, part)| {
            let source = Arc::clone(&source);
            let segment = segment.clone();
            let part = part.clone();
            let progress = progress.clone();
            let policy = policy.clone();
            thread::spawn(move || {
                run_segment(source.as_ref(), &segment, &part, &progress, &policy)
                    .map_err(|err| (segment.index, err))
            })
        })
        .collect();

    // Join everything before acting on any failure; a failed segment must
    // not leave siblings writing while the run unwinds.
    let mut first_failure: Option<DownloadError> = None;
    for (index, handle) in handles.into_iter().enumerate() {
        let outcome = match handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                if first_failure.is_none() {
                    first_failure = Some(DownloadError::WorkerPanic { index });
                }
                continue;
            }
        };
        if let Err((index, source)) = outcome {
            if first_failure.is_none() {
                first_failure = Some(DownloadError::Segment { index, source });
            }
        }
    }
    if let Some(reporter) = reporter {
        reporter.stop();
    }
    if let Some(err) = first_failure {
        return Err(err);
    }

    let bytes_written = merge_parts(&job.output, &parts)?;
    info!(bytes_written, "download complete");
    Ok(DownloadSummary {
        bytes_written,
        bytes_observed: progress.get(),
        segments: segments.len(),
    })
}

/// Seed the counter with bytes already on disk from an earlier run.
///
/// An unbounded segment cannot be resumed, so any stale part file for it is
/// removed instead of counted. An oversized part file counts only up to its
/// segment length; the worker truncates the excess before resuming.
fn seed_progress(segments: &[Segment], parts: &[PathBuf], progress: &ProgressCounter) {
    for (segment, part) in segments.iter().zip(parts) {
        let Some(len) = segment.len() else {
            let _ = std::fs::remove_file(part);
            continue;
        };
        if let Ok(meta) = std::fs::metadata(part) {
            progress.add(meta.len().min(len));
        }
    }
}
