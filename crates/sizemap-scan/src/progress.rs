//! Scan progress reporting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

/// Snapshots are emitted once per this many entries.
const REPORT_EVERY: u64 = 1000;

/// Progress information during a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanProgress {
    /// Number of files seen so far.
    pub files_scanned: u64,
    /// Number of directories seen so far.
    pub dirs_scanned: u64,
    /// Total bytes seen so far.
    pub bytes_scanned: u64,
    /// Most recent path.
    pub current_path: PathBuf,
    /// Number of skipped entries.
    pub errors_count: u64,
    /// Time elapsed since scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_scanned as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Get total items scanned (files + dirs).
    pub fn total_items(&self) -> u64 {
        self.files_scanned + self.dirs_scanned
    }
}

/// Counters for one scan, shared by its tasks.
///
/// Snapshots go to the channel passed in for this scan only; a full or
/// closed channel drops the snapshot instead of blocking the scan.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    start_time: Instant,
    files: AtomicU64,
    dirs: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    sender: Option<mpsc::Sender<ScanProgress>>,
}

impl ProgressTracker {
    pub fn new(sender: Option<mpsc::Sender<ScanProgress>>) -> Self {
        Self {
            start_time: Instant::now(),
            files: AtomicU64::new(0),
            dirs: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            sender,
        }
    }

    pub fn record_file(&self, path: &Path, size: u64) {
        self.bytes.fetch_add(size, Ordering::Relaxed);
        let count = self.files.fetch_add(1, Ordering::Relaxed) + 1;
        if count % REPORT_EVERY == 0 {
            self.emit(path);
        }
    }

    pub fn record_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, current_path: &Path) -> ScanProgress {
        ScanProgress {
            files_scanned: self.files.load(Ordering::Relaxed),
            dirs_scanned: self.dirs.load(Ordering::Relaxed),
            bytes_scanned: self.bytes.load(Ordering::Relaxed),
            current_path: current_path.to_path_buf(),
            errors_count: self.errors.load(Ordering::Relaxed),
            elapsed: self.start_time.elapsed(),
        }
    }

    /// Send a snapshot now, dropping it if the channel is full.
    pub fn emit(&self, current_path: &Path) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(self.snapshot(current_path));
        }
    }

    /// Send the closing snapshot, waiting for channel capacity.
    ///
    /// Only a dropped receiver loses it.
    pub async fn finish(&self, current_path: &Path) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(self.snapshot(current_path)).await;
        }
    }
}
