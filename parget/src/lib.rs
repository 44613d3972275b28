//! parget - segmented, resumable parallel downloader.
//!
//! The library probes a URL for its size and name, splits the resource into
//! byte-range segments, transfers them concurrently with per-segment retry
//! and resume, and merges the part files into the final output. Connections
//! can optionally be relayed through an authenticating jump host.
//!
//! The CLI in `parget-cli` is a thin wrapper; everything it does goes
//! through [`config::DownloadConfig`], [`probe::probe`] and
//! [`orchestrator::run`].

pub mod config;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod transfer;
pub mod tunnel;

pub use config::{DownloadConfig, TunnelConfig};
pub use error::{DownloadError, Result};
pub use orchestrator::{run, DownloadJob, DownloadSummary};
