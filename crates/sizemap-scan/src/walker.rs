//! Portable in-process directory walker.

use std::fs::Metadata;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sizemap_core::{
    DirectoryNode, DirectoryTree, Expansion, ScanConfig, ScanError, ScanStrategy, ScanWarning,
    SkipReason,
};

use crate::inode::InodeTracker;
use crate::limiter::ConcurrencyLimiter;
use crate::progress::{ProgressTracker, ScanProgress};
use crate::rules::IgnoreMatcher;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Recursive scanner that works on any platform.
///
/// Every `lstat` and `readdir` goes through one [`ConcurrencyLimiter`]
/// shared by the whole scan, while subdirectories are walked as
/// concurrent tasks. Entries that cannot be read are left out and
/// reported in [`DirectoryTree::warnings`].
#[derive(Debug, Default)]
pub struct TreeWalker {
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<ScanProgress>>,
}

impl TreeWalker {
    /// Create a new walker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort scans when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Send progress snapshots to `sender` while scanning.
    ///
    /// Periodic snapshots are dropped when the channel is full. The closing
    /// snapshot waits for room, so drain the receiver while the scan runs.
    pub fn with_progress(mut self, sender: mpsc::Sender<ScanProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Scan `config.root` into a tree.
    ///
    /// Fails only if the root cannot be resolved, is not a directory, or
    /// cannot be listed, or if the scan is cancelled.
    pub async fn scan(&self, config: &ScanConfig) -> Result<DirectoryTree, ScanError> {
        config.validate()?;
        let start = Instant::now();

        let limiter =
            ConcurrencyLimiter::with_cancellation(config.concurrency, self.cancel.clone());
        let root_path = limiter
            .run(tokio::fs::canonicalize(&config.root))
            .await?
            .map_err(|e| ScanError::io(&config.root, e))?;
        let root_metadata = limiter
            .run(tokio::fs::metadata(&root_path))
            .await?
            .map_err(|e| ScanError::io(&root_path, e))?;
        if !root_metadata.is_dir() {
            return Err(ScanError::NotADirectory { path: root_path });
        }

        let ignore = limiter
            .run(IgnoreMatcher::load(
                &root_path,
                config.ignore_file.as_deref(),
                &config.ignore_patterns,
            ))
            .await?;

        let ctx = Arc::new(WalkContext {
            max_depth: config.max_depth,
            root_device: if config.cross_filesystems {
                None
            } else {
                device_of(&root_metadata)
            },
            limiter,
            ignore,
            inodes: config.count_hardlinks_once.then(InodeTracker::new),
            progress: ProgressTracker::new(self.progress.clone()),
            warnings: Mutex::new(Vec::new()),
        });

        info!(
            root = %root_path.display(),
            max_depth = config.max_depth,
            concurrency = ctx.limiter.limit(),
            "starting portable scan"
        );

        let entries = ctx
            .read_dir(&root_path)
            .await?
            .map_err(|e| ScanError::io(&root_path, e))?;
        ctx.progress.record_dir();
        let root = ctx.expand(root_path.clone(), entries, 0).await;

        if self.cancel.is_cancelled() {
            return Err(ScanError::Interrupted);
        }

        ctx.progress.finish(&root_path).await;
        let warnings = std::mem::take(&mut *ctx.warnings.lock());
        let scan_duration = start.elapsed();
        info!(
            root = %root_path.display(),
            size = root.size,
            skipped = warnings.len(),
            elapsed_ms = scan_duration.as_millis() as u64,
            "portable scan finished"
        );

        Ok(DirectoryTree::new(
            root,
            config.clone(),
            ScanStrategy::Portable,
            scan_duration,
            warnings,
        ))
    }
}

/// State shared by every task of one scan.
struct WalkContext {
    max_depth: u32,
    root_device: Option<u64>,
    limiter: ConcurrencyLimiter,
    ignore: IgnoreMatcher,
    inodes: Option<InodeTracker>,
    progress: ProgressTracker,
    warnings: Mutex<Vec<ScanWarning>>,
}

impl WalkContext {
    async fn read_dir(&self, dir: &Path) -> Result<io::Result<Vec<PathBuf>>, ScanError> {
        self.limiter
            .run(async {
                let mut reader = tokio::fs::read_dir(dir).await?;
                let mut paths = Vec::new();
                while let Some(entry) = reader.next_entry().await? {
                    paths.push(entry.path());
                }
                Ok::<_, io::Error>(paths)
            })
            .await
    }

    async fn lstat(&self, path: &Path) -> Result<io::Result<Metadata>, ScanError> {
        self.limiter.run(tokio::fs::symlink_metadata(path)).await
    }

    /// Stat an entry, turning every failure into a skip.
    async fn entry_metadata(&self, path: &Path) -> Result<Metadata, ScanWarning> {
        let metadata = match self.lstat(path).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(err)) => return Err(ScanWarning::metadata_error(path, &err)),
            Err(_) => return Err(ScanWarning::cancelled(path)),
        };
        if let (Some(root), Some(device)) = (self.root_device, device_of(&metadata)) {
            if root != device {
                return Err(ScanWarning::new(
                    path,
                    "On another filesystem",
                    SkipReason::CrossFilesystem,
                ));
            }
        }
        Ok(metadata)
    }

    fn skip(&self, warning: ScanWarning) {
        debug!(path = %warning.path.display(), reason = ?warning.kind, "{}", warning.message);
        self.progress.record_error();
        self.warnings.lock().push(warning);
    }

    fn file_size(&self, path: &Path, metadata: &Metadata) -> u64 {
        let size = match &self.inodes {
            Some(tracker) => tracker.attributed_size(metadata),
            None => metadata.len(),
        };
        self.progress.record_file(path, size);
        size
    }

    /// Build the node for one entry at `depth` below the root.
    fn visit(self: Arc<Self>, path: PathBuf, depth: u32) -> BoxFuture<Result<DirectoryNode, ScanWarning>> {
        Box::pin(async move {
            let metadata = self.entry_metadata(&path).await?;
            let file_type = metadata.file_type();

            if file_type.is_symlink() {
                return Ok(DirectoryNode::new_symlink(path));
            }
            if !file_type.is_dir() {
                let size = self.file_size(&path, &metadata);
                return Ok(DirectoryNode::new_file(path, size));
            }

            self.progress.record_dir();
            if self.ignore.matches_path(&path, true) {
                let size = Arc::clone(&self).size_only(path.clone()).await;
                return Ok(DirectoryNode::new_opaque_directory(path, Expansion::Ignored, size));
            }
            if depth >= self.max_depth {
                let size = Arc::clone(&self).size_only(path.clone()).await;
                return Ok(DirectoryNode::new_opaque_directory(path, Expansion::Truncated, size));
            }

            match self.read_dir(&path).await {
                Ok(Ok(entries)) => Ok(self.expand(path, entries, depth).await),
                Ok(Err(err)) => Err(ScanWarning::read_error(&path, &err)),
                Err(_) => Err(ScanWarning::cancelled(&path)),
            }
        })
    }

    /// Visit every entry of an already-listed directory and aggregate.
    async fn expand(self: &Arc<Self>, path: PathBuf, entries: Vec<PathBuf>, depth: u32) -> DirectoryNode {
        let mut tasks = JoinSet::new();
        for (index, child) in entries.into_iter().enumerate() {
            let ctx = Arc::clone(self);
            tasks.spawn(async move { (index, ctx.visit(child, depth + 1).await) });
        }

        let mut children = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(node))) => children.push((index, node)),
                Ok((_, Err(warning))) => self.skip(warning),
                Err(err) => {
                    warn!(dir = %path.display(), error = %err, "walker task failed");
                    self.skip(ScanWarning::new(&path, err.to_string(), SkipReason::ReadError));
                }
            }
        }
        children.sort_by_key(|(index, _)| *index);

        let mut node = DirectoryNode::new_directory(path);
        node.children = children.into_iter().map(|(_, child)| child).collect();
        node.resum();
        node
    }

    /// Total bytes below `dir`, without keeping the hierarchy.
    fn size_only(self: Arc<Self>, dir: PathBuf) -> BoxFuture<u64> {
        Box::pin(async move {
            let entries = match self.read_dir(&dir).await {
                Ok(Ok(entries)) => entries,
                Ok(Err(err)) => {
                    self.skip(ScanWarning::read_error(&dir, &err));
                    return 0;
                }
                Err(_) => return 0,
            };

            let mut tasks = JoinSet::new();
            for child in entries {
                let ctx = Arc::clone(&self);
                tasks.spawn(ctx.entry_size(child));
            }

            let mut total = 0;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(size) => total += size,
                    Err(err) => warn!(dir = %dir.display(), error = %err, "size task failed"),
                }
            }
            total
        })
    }

    async fn entry_size(self: Arc<Self>, path: PathBuf) -> u64 {
        let metadata = match self.entry_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(warning) => {
                if warning.kind != SkipReason::Cancelled {
                    self.skip(warning);
                }
                return 0;
            }
        };
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            0
        } else if file_type.is_dir() {
            self.progress.record_dir();
            self.size_only(path).await
        } else {
            self.file_size(&path, &metadata)
        }
    }
}

#[cfg(unix)]
fn device_of(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.dev())
}

#[cfg(not(unix))]
fn device_of(_metadata: &Metadata) -> Option<u64> {
    None
}
