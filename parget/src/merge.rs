//! Part-file assembly.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::DownloadError;

/// Concatenate `parts` into `output` in order, deleting each part once it
/// has been copied.
///
/// The output is opened with exclusive create so an existing file is never
/// clobbered. On failure the output may be partial, but every part not yet
/// copied is still on disk. Returns the bytes written.
pub fn merge_parts(output: &Path, parts: &[PathBuf]) -> Result<u64, DownloadError> {
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output)
        .map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                DownloadError::OutputExists {
                    path: output.to_path_buf(),
                }
            } else {
                DownloadError::Merge {
                    path: output.to_path_buf(),
                    source: err,
                }
            }
        })?;

    let mut written = 0u64;
    for part_path in parts {
        written += copy_part(&mut out, part_path).map_err(|source| DownloadError::Merge {
            path: part_path.clone(),
            source,
        })?;
    }
    debug!(output = %output.display(), parts = parts.len(), written, "merge complete");
    Ok(written)
}

fn copy_part(out: &mut File, part_path: &Path) -> io::Result<u64> {
    let mut part = File::open(part_path)?;
    let copied = io::copy(&mut part, out)?;
    drop(part);
    std::fs::remove_file(part_path)?;
    Ok(copied)
}
