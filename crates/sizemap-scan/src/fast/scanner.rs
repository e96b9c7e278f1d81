//! Scanner facade over the enumerator and the tree builder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sizemap_core::{DirectoryTree, ScanConfig, ScanError, ScanStrategy};

use super::builder::TreeBuilder;
use super::enumerator::{EnumeratedRecord, StreamingEnumerator};
use super::source::{EntryFilter, RecordSource};
use crate::rules::IgnoreMatcher;

/// Fast scan backed by external enumeration and size tools.
///
/// Any error from [`FastScanner::scan`] for which
/// [`ScanError::allows_fallback`] holds means the caller should retry with
/// the portable walker.
#[derive(Debug, Clone)]
pub struct FastScanner {
    enumerator: StreamingEnumerator,
}

impl FastScanner {
    /// Scan with a specific record source.
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self {
            enumerator: StreamingEnumerator::new(source),
        }
    }

    /// Scan with the host's tools, if the platform has them.
    pub fn system() -> Result<Self, ScanError> {
        Ok(Self {
            enumerator: StreamingEnumerator::system()?,
        })
    }

    /// Abort scans when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.enumerator = self.enumerator.with_cancellation(token);
        self
    }

    /// Scan `config.root` into a tree.
    pub async fn scan(&self, config: &ScanConfig) -> Result<DirectoryTree, ScanError> {
        config.validate()?;
        let start = Instant::now();

        let root = tokio::fs::canonicalize(&config.root)
            .await
            .map_err(|e| ScanError::io(&config.root, e))?;
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| ScanError::io(&root, e))?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory { path: root });
        }

        info!(
            root = %root.display(),
            max_depth = config.max_depth,
            min_size = config.min_size,
            "starting fast scan"
        );

        let mut enumeration = self.enumerator.enumerate(&root, &EntryFilter::from(config));
        let mut flat = HashMap::new();
        let mut totals = HashMap::new();
        let mut dropped_totals = 0u64;
        while let Some(record) = enumeration.next().await {
            match record {
                EnumeratedRecord::Entry(entry) => {
                    flat.insert(entry.path.clone(), entry);
                }
                EnumeratedRecord::Total(total) => {
                    if within_depth(&root, &total.path, config.max_depth) {
                        totals.insert(total.path, total.size);
                    } else {
                        dropped_totals += 1;
                    }
                }
            }
        }
        let summary = enumeration.finish().await?;
        if dropped_totals > 0 {
            debug!(root = %root.display(), dropped_totals, "totals outside the scanned depth");
        }

        let mut node = TreeBuilder::build(flat, &totals, &root)?;
        let ignore =
            IgnoreMatcher::load(&root, config.ignore_file.as_deref(), &config.ignore_patterns).await;
        TreeBuilder::mark_opaque(&mut node, &ignore, config.max_depth);

        let scan_duration = start.elapsed();
        info!(
            root = %root.display(),
            size = node.size,
            entries = summary.entries,
            totals = summary.totals,
            elapsed_ms = scan_duration.as_millis() as u64,
            "fast scan finished"
        );

        Ok(DirectoryTree::new(
            node,
            config.clone(),
            ScanStrategy::Fast,
            scan_duration,
            summary.warnings,
        ))
    }
}

/// Whether `path` lies under `root` at most `max_depth` levels down.
fn within_depth(root: &Path, path: &Path, max_depth: u32) -> bool {
    path.strip_prefix(root)
        .is_ok_and(|relative| relative.components().count() <= max_depth as usize)
}
