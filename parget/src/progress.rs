//! Shared progress accounting and console reporting.
//!
//! [`ProgressCounter`] is the one datum mutated by multiple concurrent
//! tasks. All mutations are single atomic additions, so there is no
//! read-modify-write race to guard against; readers only ever observe a
//! monotonically increasing value.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the reporter samples the counter.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cloneable handle over the run-wide byte counter.
///
/// Seeded by the orchestrator with bytes already on disk before any worker
/// starts, then incremented by workers after every successful part-file
/// write. Never reset during a run.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    inner: Arc<AtomicU64>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `bytes` more bytes written to some part file.
    pub fn add(&self, bytes: u64) {
        self.inner.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

/// Background thread that renders a throttled single-line progress display.
///
/// The line is redrawn only when the whole-kilobyte count changes or the
/// download completes. The thread exits on its own once the counter reaches
/// `total`; [`ProgressReporter::stop`] ends it early (the orchestrator does
/// this before merging so no progress output interleaves with the merge).
#[derive(Debug)]
pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Spawn the reporting thread. `total` is the known content length.
    pub fn start(counter: ProgressCounter, total: u64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || report_loop(&counter, total, &stop_flag));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the thread and wait for its final line.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report_loop(counter: &ProgressCounter, total: u64, stop: &AtomicBool) {
    let total_kb = total / 1024;
    let mut last_kb: Option<u64> = None;
    loop {
        let done = counter.get();
        let kb = done / 1024;
        let complete = done >= total;
        if complete || last_kb.map_or(true, |last| kb > last) {
            print!("\r{}", render_line(done, total, total_kb));
            let _ = io::stdout().flush();
            last_kb = Some(kb);
        }
        if complete || stop.load(Ordering::Relaxed) {
            println!();
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn render_line(done: u64, total: u64, total_kb: u64) -> String {
    let percent = if total == 0 { 100 } else { done * 100 / total };
    format!("Progress: {}KB of {}KB ({}%)", done / 1024, total_kb, percent)
}
