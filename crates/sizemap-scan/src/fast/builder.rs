//! Hierarchy reconstruction from flat enumeration records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use sizemap_core::{DirectoryNode, Expansion, NodeKind, ScanError};

use super::record::{FlatPathRecord, RecordKind};
use crate::rules::IgnoreMatcher;

/// Rebuilds a tree from `path -> record` and `path -> total` maps.
pub struct TreeBuilder;

impl TreeBuilder {
    /// Link every record to its parent and resolve directory sizes.
    ///
    /// Parents are found from path structure alone. A record is a
    /// directory if it was reported as one or, failing that, if anything
    /// was linked under it. Directory sizes use the external total when one
    /// exists, else the sum of the children, resolved bottom-up. Records
    /// whose parent was never reported are dropped.
    pub fn build(
        flat: HashMap<PathBuf, FlatPathRecord>,
        totals: &HashMap<PathBuf, u64>,
        root: &Path,
    ) -> Result<DirectoryNode, ScanError> {
        if !flat.contains_key(root) {
            return Err(ScanError::MissingRoot {
                path: root.to_path_buf(),
            });
        }

        let mut children_of: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
        let mut orphans = 0usize;
        for path in flat.keys() {
            if path == root {
                continue;
            }
            match path.parent() {
                Some(parent) if flat.contains_key(parent) => {
                    children_of
                        .entry(parent.to_path_buf())
                        .or_default()
                        .push(path.clone());
                }
                _ => orphans += 1,
            }
        }
        if orphans > 0 {
            debug!(root = %root.display(), orphans, "records without a reported parent");
        }

        let mut records = flat;
        assemble(root, &mut records, &mut children_of, totals).ok_or_else(|| {
            ScanError::MissingRoot {
                path: root.to_path_buf(),
            }
        })
    }

    /// Mark directories the portable walker would not have expanded.
    ///
    /// Directories matching an ignore rule lose their children and become
    /// [`Expansion::Ignored`]; childless directories at the depth ceiling
    /// become [`Expansion::Truncated`]. Sizes are left as they are.
    pub fn mark_opaque(root: &mut DirectoryNode, ignore: &IgnoreMatcher, max_depth: u32) {
        for child in &mut root.children {
            mark(child, ignore, 1, max_depth);
        }
    }
}

fn assemble(
    path: &Path,
    records: &mut HashMap<PathBuf, FlatPathRecord>,
    children_of: &mut HashMap<PathBuf, Vec<PathBuf>>,
    totals: &HashMap<PathBuf, u64>,
) -> Option<DirectoryNode> {
    let record = records.remove(path)?;
    let mut children: Vec<DirectoryNode> = children_of
        .remove(path)
        .unwrap_or_default()
        .iter()
        .filter_map(|child| assemble(child, records, children_of, totals))
        .collect();

    if record.kind != RecordKind::Directory && children.is_empty() {
        return Some(match record.kind {
            RecordKind::Symlink => DirectoryNode::new_symlink(record.path),
            _ => DirectoryNode::new_file(record.path, record.size),
        });
    }

    children.sort_by(|a, b| a.name.cmp(&b.name));
    let mut node = DirectoryNode::new_directory(record.path);
    node.children = children;
    match totals.get(path) {
        Some(&total) => {
            node.size = total;
            node.authoritative = true;
        }
        None => node.resum(),
    }
    Some(node)
}

fn mark(node: &mut DirectoryNode, ignore: &IgnoreMatcher, depth: u32, max_depth: u32) {
    if !node.is_dir() {
        return;
    }
    if ignore.matches_path(&node.path, true) {
        node.children.clear();
        node.kind = NodeKind::Directory {
            expansion: Expansion::Ignored,
        };
        return;
    }
    if depth >= max_depth && node.children.is_empty() {
        node.kind = NodeKind::Directory {
            expansion: Expansion::Truncated,
        };
        return;
    }
    for child in &mut node.children {
        mark(child, ignore, depth + 1, max_depth);
    }
}
