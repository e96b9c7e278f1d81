//! In-place tree pruning after known deletions.
//!
//! After a bulk delete whose paths are known exactly, the existing tree is
//! patched instead of rescanned: deleted subtrees are dropped and every
//! directory on the path from the root to a deleted node gets its size
//! recomputed from its remaining children.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use crate::node::DirectoryNode;

/// Remove every node whose path is in `deleted`.
///
/// Returns `None` when the root itself was deleted, meaning the selected
/// root no longer exists (not that it became empty).
pub fn prune(mut root: DirectoryNode, deleted: &HashSet<PathBuf>) -> Option<DirectoryNode> {
    if deleted.contains(&root.path) {
        debug!(path = %root.path.display(), "root removed by deletion");
        return None;
    }
    let before = root.size;
    if prune_in_place(&mut root, deleted) {
        debug!(
            path = %root.path.display(),
            freed = before.saturating_sub(root.size),
            "pruned deleted paths"
        );
    }
    Some(root)
}

/// Prune the descendants of `node` in place.
///
/// Returns whether anything below `node` was removed. Only directories on
/// an affected chain are re-summed, and they lose any authoritative total;
/// untouched subtrees keep their sizes exactly, including opaque ones.
pub fn prune_in_place(node: &mut DirectoryNode, deleted: &HashSet<PathBuf>) -> bool {
    if node.children.is_empty() || deleted.is_empty() {
        return false;
    }

    let before = node.children.len();
    node.children.retain(|child| !deleted.contains(&child.path));
    let mut changed = node.children.len() != before;

    for child in &mut node.children {
        changed |= prune_in_place(child, deleted);
    }

    if changed {
        node.resum();
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Expansion;

    fn tree() -> DirectoryNode {
        let mut root = DirectoryNode::new_directory("/r");
        let mut b = DirectoryNode::new_directory("/r/b");
        b.children.push(DirectoryNode::new_file("/r/b/c.txt", 200));
        b.children.push(DirectoryNode::new_file("/r/b/d.txt", 50));
        b.resum();
        root.children.push(DirectoryNode::new_file("/r/a.txt", 100));
        root.children.push(b);
        root.children.push(DirectoryNode::new_opaque_directory(
            "/r/node_modules",
            Expansion::Ignored,
            1000,
        ));
        root.resum();
        root
    }

    #[test]
    fn test_prune_nothing_is_identity() {
        let original = tree();
        let pruned = prune(original.clone(), &HashSet::new()).unwrap();
        assert_eq!(pruned, original);
    }

    #[test]
    fn test_prune_root_is_gone() {
        let deleted: HashSet<PathBuf> = [PathBuf::from("/r")].into();
        assert!(prune(tree(), &deleted).is_none());
    }

    #[test]
    fn test_prune_nested_file() {
        let deleted: HashSet<PathBuf> = [PathBuf::from("/r/b/c.txt")].into();
        let pruned = prune(tree(), &deleted).unwrap();

        assert_eq!(pruned.size, 1150);
        let b = pruned.find(std::path::Path::new("/r/b")).unwrap();
        assert_eq!(b.size, 50);
        assert_eq!(b.children.len(), 1);
        // Siblings outside the chain keep their sizes.
        let ignored = pruned.find(std::path::Path::new("/r/node_modules")).unwrap();
        assert_eq!(ignored.size, 1000);
        assert!(pruned.is_consistent());
    }

    #[test]
    fn test_prune_drops_authoritative_total() {
        let mut root = tree();
        root.size = 5000;
        root.authoritative = true;

        let deleted: HashSet<PathBuf> = [PathBuf::from("/r/a.txt")].into();
        let pruned = prune(root, &deleted).unwrap();
        assert!(!pruned.authoritative);
        assert_eq!(pruned.size, 1250);
    }

    #[test]
    fn test_prune_unknown_path_changes_nothing() {
        let original = tree();
        let deleted: HashSet<PathBuf> = [PathBuf::from("/elsewhere/x")].into();
        assert_eq!(prune(original.clone(), &deleted).unwrap(), original);
    }
}
