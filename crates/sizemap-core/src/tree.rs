//! Scan result container and statistics.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::ScanWarning;
use crate::node::{DirectoryNode, NodeKind};
use crate::surgery;

/// Which scanner produced a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStrategy {
    /// In-process recursive walker.
    Portable,
    /// External enumeration and size tools.
    Fast,
}

impl std::fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Portable => write!(f, "portable"),
            Self::Fast => write!(f, "fast"),
        }
    }
}

/// Summary statistics for a scanned tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Total size in bytes.
    pub total_size: u64,
    /// Total number of files in the kept hierarchy.
    pub total_files: u64,
    /// Total number of directories, root included.
    pub total_dirs: u64,
    /// Total number of symbolic links.
    pub total_symlinks: u64,
    /// Maximum depth reached.
    pub max_depth: u32,
    /// Largest file (path, size).
    pub largest_file: Option<(PathBuf, u64)>,
}

impl TreeStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute stats for a finished tree.
    pub fn from_root(root: &DirectoryNode) -> Self {
        let mut stats = Self {
            total_size: root.size,
            ..Self::default()
        };
        let mut stack = vec![(root, 0u32)];
        while let Some((node, depth)) = stack.pop() {
            stats.max_depth = stats.max_depth.max(depth);
            match node.kind {
                NodeKind::File => stats.record_file(&node.path, node.size),
                NodeKind::Symlink => stats.total_symlinks += 1,
                NodeKind::Directory { .. } => stats.total_dirs += 1,
            }
            stack.extend(node.children.iter().map(|c| (c, depth + 1)));
        }
        stats
    }

    fn record_file(&mut self, path: &std::path::Path, size: u64) {
        self.total_files += 1;
        if self.largest_file.as_ref().is_none_or(|(_, s)| size > *s) {
            self.largest_file = Some((path.to_path_buf(), size));
        }
    }
}

/// Complete scan result with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryTree {
    /// Root node of the tree.
    pub root: DirectoryNode,

    /// Root path that was scanned.
    pub root_path: PathBuf,

    /// When this scan was performed.
    pub scanned_at: SystemTime,

    /// Duration of the scan.
    pub scan_duration: Duration,

    /// Scan configuration used.
    pub config: ScanConfig,

    /// Scanner that produced the tree.
    pub strategy: ScanStrategy,

    /// Summary statistics.
    pub stats: TreeStats,

    /// Entries left out of the tree, and why.
    pub warnings: Vec<ScanWarning>,
}

impl DirectoryTree {
    /// Create a new tree.
    pub fn new(
        root: DirectoryNode,
        config: ScanConfig,
        strategy: ScanStrategy,
        scan_duration: Duration,
        warnings: Vec<ScanWarning>,
    ) -> Self {
        let stats = TreeStats::from_root(&root);
        Self {
            root_path: root.path.clone(),
            root,
            scanned_at: SystemTime::now(),
            scan_duration,
            config,
            strategy,
            stats,
            warnings,
        }
    }

    /// Get the total size of the tree.
    pub fn total_size(&self) -> u64 {
        self.root.size
    }

    /// Get the total number of files.
    pub fn total_files(&self) -> u64 {
        self.stats.total_files
    }

    /// Get the total number of directories.
    pub fn total_dirs(&self) -> u64 {
        self.stats.total_dirs
    }

    /// Check if any entries were skipped during scanning.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Remove already-deleted paths and fix up ancestor sizes.
    ///
    /// Returns `None` when the root itself was deleted.
    pub fn apply_deletions(mut self, deleted: &HashSet<PathBuf>) -> Option<Self> {
        if deleted.contains(&self.root.path) {
            return None;
        }
        if surgery::prune_in_place(&mut self.root, deleted) {
            self.stats = TreeStats::from_root(&self.root);
        }
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DirectoryNode {
        let mut root = DirectoryNode::new_directory("/r");
        let mut b = DirectoryNode::new_directory("/r/b");
        b.children.push(DirectoryNode::new_file("/r/b/c.txt", 200));
        b.resum();
        root.children.push(DirectoryNode::new_file("/r/a.txt", 100));
        root.children.push(b);
        root.children.push(DirectoryNode::new_symlink("/r/link"));
        root.resum();
        root
    }

    #[test]
    fn test_tree_stats_from_root() {
        let stats = TreeStats::from_root(&sample());
        assert_eq!(stats.total_size, 300);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_dirs, 2);
        assert_eq!(stats.total_symlinks, 1);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(
            stats.largest_file,
            Some((PathBuf::from("/r/b/c.txt"), 200))
        );
    }

    #[test]
    fn test_apply_deletions_updates_stats() {
        let tree = DirectoryTree::new(
            sample(),
            ScanConfig::new("/r"),
            ScanStrategy::Portable,
            Duration::ZERO,
            Vec::new(),
        );
        let deleted: HashSet<PathBuf> = [PathBuf::from("/r/b")].into();
        let tree = tree.apply_deletions(&deleted).unwrap();
        assert_eq!(tree.total_size(), 100);
        assert_eq!(tree.stats.total_files, 1);
        assert_eq!(tree.stats.total_dirs, 1);
    }

    #[test]
    fn test_apply_deletions_root_gone() {
        let tree = DirectoryTree::new(
            sample(),
            ScanConfig::new("/r"),
            ScanStrategy::Fast,
            Duration::ZERO,
            Vec::new(),
        );
        let deleted: HashSet<PathBuf> = [PathBuf::from("/r")].into();
        assert!(tree.apply_deletions(&deleted).is_none());
    }
}
