//! File and directory node types.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// How far a directory was expanded during the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expansion {
    /// Children were enumerated.
    Expanded,
    /// Matched an ignore rule; size only.
    Ignored,
    /// Sits at the depth ceiling; size only.
    Truncated,
}

/// Type of file system node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file, or any other non-directory entry.
    File,
    /// Directory.
    Directory {
        /// Whether the hierarchy below was kept.
        expansion: Expansion,
    },
    /// Symbolic link. Never followed, always zero-sized.
    Symlink,
}

impl NodeKind {
    /// An expanded directory.
    pub const DIRECTORY: NodeKind = NodeKind::Directory {
        expansion: Expansion::Expanded,
    };

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory { .. })
    }

    /// Check if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, NodeKind::Symlink)
    }
}

/// A single entry in a scanned tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    /// Base name (not full path).
    pub name: CompactString,

    /// Absolute path, unique within one scan result.
    pub path: PathBuf,

    /// Node type.
    pub kind: NodeKind,

    /// Size in bytes (aggregate for directories).
    pub size: u64,

    /// `size` came from an external size tool rather than from summing children.
    #[serde(default)]
    pub authoritative: bool,

    /// Children nodes (directories only).
    pub children: Vec<DirectoryNode>,
}

impl DirectoryNode {
    /// Create a new file node.
    pub fn new_file(path: impl Into<PathBuf>, size: u64) -> Self {
        Self::leaf(path.into(), NodeKind::File, size)
    }

    /// Create a new symlink node.
    pub fn new_symlink(path: impl Into<PathBuf>) -> Self {
        Self::leaf(path.into(), NodeKind::Symlink, 0)
    }

    /// Create a new, empty, expanded directory node.
    pub fn new_directory(path: impl Into<PathBuf>) -> Self {
        Self::leaf(path.into(), NodeKind::DIRECTORY, 0)
    }

    /// Create a directory whose hierarchy was not kept.
    pub fn new_opaque_directory(path: impl Into<PathBuf>, expansion: Expansion, size: u64) -> Self {
        Self::leaf(path.into(), NodeKind::Directory { expansion }, size)
    }

    fn leaf(path: PathBuf, kind: NodeKind, size: u64) -> Self {
        Self {
            name: name_of(&path),
            path,
            kind,
            size,
            authoritative: false,
            children: Vec::new(),
        }
    }

    /// Check if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Check if this node is a file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Check if this directory kept no hierarchy (ignored or truncated).
    pub fn is_opaque(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Directory {
                expansion: Expansion::Ignored | Expansion::Truncated
            }
        )
    }

    /// Get the number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Sum of the direct children's sizes.
    pub fn children_sum(&self) -> u64 {
        self.children.iter().map(|c| c.size).sum()
    }

    /// Set `size` to the sum of children and drop any external total.
    pub fn resum(&mut self) {
        self.size = self.children_sum();
        self.authoritative = false;
    }

    /// Sort children by size in descending order.
    pub fn sort_children_by_size(&mut self) {
        self.children.sort_by(|a, b| b.size.cmp(&a.size));
        for child in &mut self.children {
            child.sort_children_by_size();
        }
    }

    /// Find a node by absolute path.
    pub fn find(&self, path: &Path) -> Option<&DirectoryNode> {
        if self.path == path {
            return Some(self);
        }
        if !path.starts_with(&self.path) {
            return None;
        }
        self.children.iter().find_map(|c| c.find(path))
    }

    /// Iterate over this node and all descendants in pre-order.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        self.walk().count()
    }

    /// Check the size invariant for the whole subtree.
    ///
    /// Expanded directories without an authoritative total must equal the
    /// sum of their children; opaque directories are exempt, as are nodes
    /// with an authoritative size (their children are still checked).
    pub fn is_consistent(&self) -> bool {
        self.walk().all(|node| match node.kind {
            NodeKind::Directory {
                expansion: Expansion::Expanded,
            } => node.authoritative || node.size == node.children_sum(),
            NodeKind::Directory { .. } => node.children.is_empty(),
            NodeKind::File | NodeKind::Symlink => node.children.is_empty(),
        })
    }
}

/// Pre-order iterator over a subtree.
pub struct Walk<'a> {
    stack: Vec<&'a DirectoryNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a DirectoryNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Base name of a path; the full path when it has none (e.g. `/`).
pub fn name_of(path: &Path) -> CompactString {
    path.file_name()
        .map(|n| CompactString::new(n.to_string_lossy()))
        .unwrap_or_else(|| CompactString::new(path.to_string_lossy()))
}
