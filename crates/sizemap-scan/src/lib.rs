//! Directory scanning engines for sizemap.
//!
//! Two scanners produce the same [`DirectoryTree`] shape:
//!
//! - [`TreeWalker`] walks the filesystem in-process on any platform, with
//!   every filesystem call bounded by a shared [`ConcurrencyLimiter`].
//! - [`FastScanner`] runs external enumeration and size tools, streams
//!   their output and rebuilds the hierarchy. It is Unix-only; callers
//!   fall back to the walker when it reports an error for which
//!   [`ScanError::allows_fallback`] holds.
//!
//! # Example
//!
//! ```rust,no_run
//! use sizemap_scan::{ScanConfig, TreeWalker};
//!
//! # async fn run() -> Result<(), sizemap_scan::ScanError> {
//! let config = ScanConfig::new("/path/to/scan").with_max_depth(3);
//! let tree = TreeWalker::new().scan(&config).await?;
//!
//! println!("Total size: {} bytes", tree.total_size());
//! for skipped in &tree.warnings {
//!     println!("skipped {}: {}", skipped.path.display(), skipped.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Progress Monitoring
//!
//! Progress is reported on a channel scoped to one scan:
//!
//! ```rust,no_run
//! use sizemap_scan::{ScanConfig, ScanProgress, TreeWalker};
//!
//! # async fn run() {
//! let (tx, mut rx) = tokio::sync::mpsc::channel::<ScanProgress>(16);
//! tokio::spawn(async move {
//!     while let Some(progress) = rx.recv().await {
//!         println!("Scanned {} files", progress.files_scanned);
//!     }
//! });
//! let _tree = TreeWalker::new()
//!     .with_progress(tx)
//!     .scan(&ScanConfig::new("."))
//!     .await;
//! # }
//! ```

pub mod fast;
mod inode;
mod limiter;
mod progress;
mod rules;
mod walker;

pub use fast::FastScanner;
pub use inode::{InodeKey, InodeTracker};
pub use limiter::ConcurrencyLimiter;
pub use progress::ScanProgress;
pub use rules::IgnoreMatcher;
pub use walker::TreeWalker;

// Re-export core types for convenience
pub use sizemap_core::{
    DirectoryNode, DirectoryTree, Expansion, NodeKind, ScanConfig, ScanError, ScanStrategy,
    ScanWarning, SkipReason, TreeStats, prune,
};
