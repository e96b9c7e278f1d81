//! Integration tests for sizemap-scan.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use sizemap_scan::fast::BufferedSource;
use sizemap_scan::{
    DirectoryNode, DirectoryTree, Expansion, FastScanner, NodeKind, ScanConfig, ScanError,
    ScanStrategy, TreeWalker,
};

/// a.txt (100 bytes), b/c.txt (200 bytes).
fn create_test_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("a.txt"), vec![b'a'; 100]).unwrap();
    fs::write(root.join("b/c.txt"), vec![b'c'; 200]).unwrap();

    temp
}

/// Several levels of nesting with files at each level.
fn create_deep_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let mut dir = temp.path().to_path_buf();
    for level in 0..6 {
        fs::write(dir.join(format!("file{level}.bin")), vec![0u8; 10 * (level + 1)]).unwrap();
        dir = dir.join(format!("level{level}"));
        fs::create_dir(&dir).unwrap();
    }
    fs::write(dir.join("leaf.bin"), vec![0u8; 7]).unwrap();
    temp
}

fn sizes_by_path(tree: &DirectoryTree) -> HashMap<PathBuf, u64> {
    tree.root.walk().map(|n| (n.path.clone(), n.size)).collect()
}

fn depth_below(root: &Path, node: &DirectoryNode) -> usize {
    node.path
        .strip_prefix(root)
        .map(|rel| rel.components().count())
        .unwrap_or(0)
}

async fn portable_scan(config: &ScanConfig) -> DirectoryTree {
    TreeWalker::new().scan(config).await.unwrap()
}

#[tokio::test]
async fn test_scan_end_to_end() {
    let temp = create_test_tree();
    let tree = portable_scan(&ScanConfig::new(temp.path())).await;

    assert_eq!(tree.total_size(), 300);
    assert_eq!(tree.total_files(), 2);
    assert_eq!(tree.total_dirs(), 2);
    assert_eq!(tree.stats.largest_file.as_ref().map(|(_, s)| *s), Some(200));
    assert!(tree.root.is_consistent());

    let b = tree.root.find(&tree.root_path.join("b")).unwrap();
    assert_eq!(b.size, 200);
    assert_eq!(b.children.len(), 1);
}

#[tokio::test]
async fn test_depth_limit_keeps_true_size() {
    let temp = create_test_tree();
    let tree = portable_scan(&ScanConfig::new(temp.path()).with_max_depth(1)).await;

    let b = tree.root.find(&tree.root_path.join("b")).unwrap();
    assert!(b.children.is_empty());
    assert_eq!(b.size, 200);
    assert!(b.is_opaque());
    assert_eq!(tree.total_size(), 300);
}

#[tokio::test]
async fn test_depth_bound_holds_everywhere() {
    let temp = create_deep_tree();
    let full = portable_scan(&ScanConfig::new(temp.path())).await;

    for max_depth in 1..=4u32 {
        let tree = portable_scan(&ScanConfig::new(temp.path()).with_max_depth(max_depth)).await;
        for node in tree.root.walk() {
            let depth = depth_below(&tree.root_path, node);
            assert!(depth <= max_depth as usize, "{} too deep", node.path.display());
            if node.is_dir() && !node.children.is_empty() {
                assert!(depth < max_depth as usize);
            }
        }
        // Truncation never loses bytes.
        assert_eq!(tree.total_size(), full.total_size());
        assert!(tree.root.is_consistent());
    }
}

#[tokio::test]
async fn test_ignored_directory_is_opaque_with_true_size() {
    let temp = create_test_tree();
    let root = temp.path();
    fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
    fs::write(root.join("node_modules/pkg/index.js"), vec![b'x'; 50]).unwrap();
    fs::write(root.join("node_modules/README"), vec![b'r'; 25]).unwrap();
    fs::write(root.join(".gitignore"), "node_modules/\n").unwrap();
    let rules_len = fs::metadata(root.join(".gitignore")).unwrap().len();

    let tree = portable_scan(&ScanConfig::new(root)).await;

    let modules = tree.root.find(&tree.root_path.join("node_modules")).unwrap();
    assert_eq!(
        modules.kind,
        NodeKind::Directory {
            expansion: Expansion::Ignored
        }
    );
    assert!(modules.children.is_empty());
    assert_eq!(modules.size, 75);
    assert_eq!(tree.total_size(), 300 + 75 + rules_len);
    assert!(tree.root.is_consistent());
}

#[tokio::test]
async fn test_extra_patterns_without_rule_file() {
    let temp = create_test_tree();
    let mut config = ScanConfig::new(temp.path());
    config.ignore_file = None;
    config.ignore_patterns = vec!["b/".to_string()];

    let tree = portable_scan(&config).await;
    let b = tree.root.find(&tree.root_path.join("b")).unwrap();
    assert!(b.is_opaque());
    assert_eq!(b.size, 200);
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let temp = create_deep_tree();
    let config = ScanConfig::new(temp.path()).with_max_depth(3);

    let first = portable_scan(&config).await;
    let second = portable_scan(&config).await;

    assert_eq!(sizes_by_path(&first), sizes_by_path(&second));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_low_concurrency_gives_same_tree() {
    let temp = create_deep_tree();
    let mut narrow = ScanConfig::new(temp.path());
    narrow.concurrency = 1;

    let wide = portable_scan(&ScanConfig::new(temp.path())).await;
    let narrow = portable_scan(&narrow).await;
    assert_eq!(sizes_by_path(&wide), sizes_by_path(&narrow));
}

#[tokio::test]
async fn test_progress_is_reported() {
    let temp = create_test_tree();
    let (tx, mut rx) = mpsc::channel(16);
    let tree = TreeWalker::new()
        .with_progress(tx)
        .scan(&ScanConfig::new(temp.path()))
        .await
        .unwrap();

    let mut last = None;
    while let Some(progress) = rx.recv().await {
        last = Some(progress);
    }
    let last = last.expect("final progress snapshot");
    assert_eq!(last.files_scanned, 2);
    assert_eq!(last.bytes_scanned, tree.total_size());
}

#[tokio::test]
async fn test_pruning_matches_rescan() {
    let temp = create_deep_tree();
    let config = ScanConfig::new(temp.path());
    let before = portable_scan(&config).await;

    let file = before.root_path.join("level0/file1.bin");
    let dir = before.root_path.join("level0/level1/level2");
    fs::remove_file(&file).unwrap();
    fs::remove_dir_all(&dir).unwrap();

    let deleted = HashSet::from([file, dir]);
    let pruned = before.apply_deletions(&deleted).unwrap();
    let rescanned = portable_scan(&config).await;

    assert_eq!(sizes_by_path(&pruned), sizes_by_path(&rescanned));
    assert_eq!(pruned.stats.total_files, rescanned.stats.total_files);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_is_zero_sized_leaf() {
    let temp = create_test_tree();
    std::os::unix::fs::symlink(temp.path().join("b"), temp.path().join("link")).unwrap();

    let tree = portable_scan(&ScanConfig::new(temp.path())).await;
    let link = tree.root.find(&tree.root_path.join("link")).unwrap();
    assert_eq!(link.kind, NodeKind::Symlink);
    assert_eq!(link.size, 0);
    assert!(link.children.is_empty());
    assert_eq!(tree.total_size(), 300);
    assert_eq!(tree.stats.total_symlinks, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_directory_is_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let temp = create_test_tree();
    let locked = temp.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("secret"), vec![0u8; 40]).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can read it anyway; nothing to check then.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = TreeWalker::new().scan(&ScanConfig::new(temp.path())).await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let tree = result.unwrap();

    assert_eq!(tree.total_size(), 300);
    assert!(tree.root.find(&tree.root_path.join("locked")).is_none());
    let warning = tree
        .warnings
        .iter()
        .find(|w| w.path.ends_with("locked"))
        .expect("warning for locked directory");
    assert_eq!(warning.kind, sizemap_scan::SkipReason::PermissionDenied);
}

fn canned_scanner(entries: String, totals: String) -> FastScanner {
    FastScanner::new(Arc::new(BufferedSource::new(entries, totals)))
}

#[tokio::test]
async fn test_fast_scan_from_canned_output() {
    let temp = create_test_tree();
    let root = fs::canonicalize(temp.path()).unwrap();
    let r = root.display();
    let entries = format!(
        "4096\td\t{r}\n100\tf\t{r}/a.txt\n4096\td\t{r}/b\n200\tf\t{r}/b/c.txt\nnot a record\n"
    );
    let totals = format!("512\t{r}/b\n");

    let tree = canned_scanner(entries, totals)
        .scan(&ScanConfig::new(temp.path()))
        .await
        .unwrap();

    assert_eq!(tree.strategy, ScanStrategy::Fast);
    let b = tree.root.find(&root.join("b")).unwrap();
    assert_eq!(b.size, 512);
    assert!(b.authoritative);
    assert_eq!(tree.total_size(), 612);
    assert_eq!(tree.warnings.len(), 1);
    assert!(tree.root.is_consistent());
}

#[tokio::test]
async fn test_fast_scan_marks_depth_and_ignores() {
    let temp = create_test_tree();
    fs::create_dir(temp.path().join("vendor")).unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    let r = root.display();
    let entries = format!(
        "0\td\t{r}\n100\tf\t{r}/a.txt\n0\td\t{r}/b\n0\td\t{r}/vendor\n"
    );
    let totals = format!("200\t{r}/b\n900\t{r}/vendor\n");

    let mut config = ScanConfig::new(temp.path()).with_max_depth(1);
    config.ignore_patterns = vec!["vendor/".to_string()];
    let tree = canned_scanner(entries, totals).scan(&config).await.unwrap();

    let b = tree.root.find(&root.join("b")).unwrap();
    assert_eq!(
        b.kind,
        NodeKind::Directory {
            expansion: Expansion::Truncated
        }
    );
    assert_eq!(b.size, 200);
    let vendor = tree.root.find(&root.join("vendor")).unwrap();
    assert_eq!(
        vendor.kind,
        NodeKind::Directory {
            expansion: Expansion::Ignored
        }
    );
    assert_eq!(tree.total_size(), 1200);
}

#[tokio::test]
async fn test_fast_scan_without_root_record_allows_fallback() {
    let temp = create_test_tree();
    let root = fs::canonicalize(temp.path()).unwrap();
    let entries = format!("100\tf\t{}/a.txt\n", root.display());

    let err = canned_scanner(entries, String::new())
        .scan(&ScanConfig::new(temp.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::MissingRoot { .. }));
    assert!(err.allows_fallback());
}

#[tokio::test]
async fn test_fast_scan_with_no_output_allows_fallback() {
    let temp = create_test_tree();
    let err = canned_scanner(String::new(), String::new())
        .scan(&ScanConfig::new(temp.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::EnumerationFailure { .. }));
    assert!(err.allows_fallback());
}

#[tokio::test]
async fn test_fast_scan_rejects_missing_root_directory() {
    let temp = TempDir::new().unwrap();
    let err = canned_scanner(String::new(), String::new())
        .scan(&ScanConfig::new(temp.path().join("gone")))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::NotFound { .. }));
    assert!(!err.allows_fallback());
}

/// GNU find is required for `-printf`.
#[cfg(target_os = "linux")]
fn has_gnu_find() -> bool {
    std::process::Command::new("find")
        .arg("--version")
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains("GNU"))
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_fast_and_portable_agree_on_shape() {
    if !has_gnu_find() {
        return;
    }
    let temp = create_deep_tree();
    let config = ScanConfig::new(temp.path()).with_max_depth(3);

    let fast = FastScanner::system().unwrap().scan(&config).await.unwrap();
    let portable = portable_scan(&config).await;

    let fast_paths: HashSet<_> = fast.root.walk().map(|n| n.path.clone()).collect();
    let portable_paths: HashSet<_> = portable.root.walk().map(|n| n.path.clone()).collect();
    assert_eq!(fast_paths, portable_paths);

    // File sizes are apparent sizes on both paths; directory totals differ
    // because the size tool reports allocated blocks.
    for node in portable.root.walk().filter(|n| n.is_file()) {
        assert_eq!(fast.root.find(&node.path).unwrap().size, node.size);
    }
    assert!(fast.root.is_consistent());
}
