//! sizemap - Disk usage trees, fast where the platform allows.
//!
//! Usage:
//!   sizemap scan [PATH]                    Scan and print a size tree
//!   sizemap export [PATH] -o FILE          Export a scan to JSON
//!   sizemap prune [PATH] --deleted FILE    Apply a deletion list to a scan
//!   sizemap --help                         Show help

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sizemap_core::{
    DEFAULT_MAX_DEPTH, DirectoryNode, DirectoryTree, Expansion, NodeKind, ScanConfig,
};
use sizemap_scan::{FastScanner, ScanProgress, TreeWalker};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "SIZEMAP_LOG";

#[derive(Parser)]
#[command(
    name = "sizemap",
    version,
    about = "Build disk usage trees",
    long_about = "sizemap reports where disk space goes below a directory.\n\n\
                  The fast strategy uses the system's find and du tools; the \
                  portable strategy walks the filesystem itself."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and print a size tree
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Number of top entries to show per directory
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Maximum depth to display
        #[arg(short = 'L', long, default_value = "3")]
        show_depth: u32,
    },

    /// Export scan results to JSON
    Export {
        #[command(flatten)]
        scan: ScanArgs,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Scan, then drop paths listed in a file of already-deleted entries
    Prune {
        #[command(flatten)]
        scan: ScanArgs,

        /// Newline-separated list of deleted paths (absolute or relative to PATH)
        #[arg(short = 'D', long)]
        deleted: PathBuf,

        /// Number of top entries to show per directory
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Maximum depth to display
        #[arg(short = 'L', long, default_value = "3")]
        show_depth: u32,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Path to scan
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Maximum depth of expanded directories
    #[arg(short, long, default_value_t = DEFAULT_MAX_DEPTH)]
    depth: u32,

    /// Leave out files smaller than this on the fast path (e.g., "1KB", "1MB")
    #[arg(short, long, default_value = "0")]
    min_size: String,

    /// Scanner to use
    #[arg(short, long, default_value = "auto")]
    strategy: Strategy,

    /// Maximum filesystem calls in flight (portable strategy)
    #[arg(short, long, default_value = "50")]
    concurrency: usize,

    /// Extra gitignore-style patterns for directories to leave unexpanded
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Do not read the root's .gitignore
    #[arg(long)]
    no_ignore_file: bool,

    /// Stay on the root's filesystem
    #[arg(long)]
    one_file_system: bool,

    /// Count each hardlinked file once (portable strategy)
    #[arg(long)]
    hardlinks_once: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Strategy {
    /// Fast when available, portable otherwise
    #[default]
    Auto,
    /// In-process walker
    Portable,
    /// External find and du
    Fast,
}

impl ScanArgs {
    fn config(&self) -> Result<ScanConfig> {
        let mut builder = ScanConfig::builder();
        builder
            .root(self.path.clone())
            .max_depth(self.depth)
            .min_size(parse_size(&self.min_size)?)
            .ignore_patterns(self.exclude.clone())
            .concurrency(self.concurrency)
            .cross_filesystems(!self.one_file_system)
            .count_hardlinks_once(self.hardlinks_once);
        if self.no_ignore_file {
            builder.ignore_file(None::<String>);
        }
        builder.build().context("Invalid scan options")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Command::Scan {
            scan,
            top,
            show_depth,
        } => {
            let tree = run_scan(&scan, &cancel).await?;
            print_tree(&tree, show_depth, top);
        }
        Command::Export { scan, output } => {
            let tree = run_scan(&scan, &cancel).await?;
            run_export(&tree, output)?;
        }
        Command::Prune {
            scan,
            deleted,
            top,
            show_depth,
        } => {
            let tree = run_scan(&scan, &cancel).await?;
            run_prune(tree, &deleted, show_depth, top)?;
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Interrupted, stopping scan...");
            cancel.cancel();
        }
    });
}

/// Scan with the requested strategy, falling back to the walker under `auto`.
async fn run_scan(args: &ScanArgs, cancel: &CancellationToken) -> Result<DirectoryTree> {
    let config = args.config()?;

    eprintln!("Scanning {}...", config.root.display());

    let tree = match args.strategy {
        Strategy::Portable => scan_portable(&config, cancel).await?,
        Strategy::Fast => FastScanner::system()?
            .with_cancellation(cancel.clone())
            .scan(&config)
            .await
            .context("Fast scan failed")?,
        Strategy::Auto => {
            let fast = match FastScanner::system() {
                Ok(scanner) => scanner.with_cancellation(cancel.clone()).scan(&config).await,
                Err(err) => Err(err),
            };
            match fast {
                Ok(tree) => tree,
                Err(err) if err.allows_fallback() => {
                    info!(error = %err, "fast scan unavailable, using portable walker");
                    scan_portable(&config, cancel).await?
                }
                Err(err) => return Err(err).context("Scan failed"),
            }
        }
    };

    if tree.has_warnings() {
        warn!(count = tree.warnings.len(), "entries skipped during scan");
    }
    Ok(tree)
}

async fn scan_portable(config: &ScanConfig, cancel: &CancellationToken) -> Result<DirectoryTree> {
    let (tx, mut rx) = mpsc::channel::<ScanProgress>(16);
    let reporter = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            eprint!(
                "\r {} files, {} directories, {}",
                progress.files_scanned,
                progress.dirs_scanned,
                format_size(progress.bytes_scanned)
            );
        }
    });

    let result = TreeWalker::new()
        .with_cancellation(cancel.clone())
        .with_progress(tx)
        .scan(config)
        .await;
    // The walker owned the only sender, so the reporter ends here.
    let _ = reporter.await;
    eprintln!();

    result.context("Scan failed")
}

/// Export scan results to JSON.
fn run_export(tree: &DirectoryTree, output: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(tree)?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, json)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            eprintln!("Exported to {}", output_path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

/// Apply a list of deleted paths to a fresh scan and print the result.
fn run_prune(tree: DirectoryTree, list: &Path, depth: u32, top_n: usize) -> Result<()> {
    let text = std::fs::read_to_string(list)
        .with_context(|| format!("Failed to read {}", list.display()))?;
    let deleted = read_deletion_list(&text, &tree.root_path);
    let before = tree.total_size();

    let Some(pruned) = tree.apply_deletions(&deleted) else {
        bail!("The scan root itself is in the deletion list");
    };

    eprintln!(
        "Pruned {} path(s), {} reclaimed",
        deleted.len(),
        format_size(before.saturating_sub(pruned.total_size()))
    );
    print_tree(&pruned, depth, top_n);
    Ok(())
}

/// Parse one path per line; relative paths are taken from the scan root.
fn read_deletion_list(text: &str, root: &Path) -> HashSet<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = Path::new(line);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            }
        })
        .collect()
}

fn print_tree(tree: &DirectoryTree, max_depth: u32, top_n: usize) {
    let mut root = tree.root.clone();
    root.sort_children_by_size();

    println!();
    println!("{}", "─".repeat(60));
    println!(
        " {} - {}",
        tree.root_path.display(),
        format_size(tree.stats.total_size)
    );
    println!(
        " {} files, {} directories",
        tree.stats.total_files, tree.stats.total_dirs
    );
    println!(
        " Scanned in {:.2}s ({} strategy)",
        tree.scan_duration.as_secs_f64(),
        tree.strategy
    );
    println!("{}", "─".repeat(60));
    println!();

    print_node(&root, 0, max_depth, top_n, root.size);

    if tree.has_warnings() {
        println!();
        println!("{} entries skipped during scan", tree.warnings.len());
    }
}

/// Print a node and its children.
fn print_node(node: &DirectoryNode, depth: u32, max_depth: u32, top_n: usize, root_size: u64) {
    let indent = "  ".repeat(depth as usize);
    let ratio = if root_size > 0 {
        node.size as f64 / root_size as f64 * 100.0
    } else {
        0.0
    };

    let bar = make_bar(ratio / 100.0, 10);

    let name = if depth == 0 {
        node.path.display().to_string()
    } else {
        node.name.to_string()
    };

    let (marker, suffix) = match node.kind {
        NodeKind::Directory {
            expansion: Expansion::Expanded,
        } => ("▼ ", "/"),
        NodeKind::Directory {
            expansion: Expansion::Ignored,
        } => ("▷ ", "/ (ignored)"),
        NodeKind::Directory {
            expansion: Expansion::Truncated,
        } => ("▶ ", "/"),
        NodeKind::Symlink => ("  ", " ->"),
        NodeKind::File => ("  ", ""),
    };

    println!(
        "{}{}{:<40} {:>10} {:>5.1}% {}",
        indent,
        marker,
        truncate(&format!("{}{}", name, suffix), 40),
        format_size(node.size),
        ratio,
        bar
    );

    if node.is_dir() && depth < max_depth {
        let children_to_show = node.children.iter().take(top_n);
        let remaining = node.children.len().saturating_sub(top_n);

        for child in children_to_show {
            print_node(child, depth + 1, max_depth, top_n, root_size);
        }

        if remaining > 0 {
            let indent = "  ".repeat((depth + 1) as usize);
            println!("{}  ... and {} more", indent, remaining);
        }
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let empty = width - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length in characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 1).collect();
        format!("{}…", kept)
    }
}

/// Parse a size string (e.g., "1KB", "10MB", "1GB").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let unit = &s[digits.len()..];

    let multiplier: u64 = match unit {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        other => bail!("Unknown size unit {other:?} in {s:?}"),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid size {s:?}"))?;

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1.5k").unwrap(), 1536);
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }

    #[test]
    fn test_make_bar() {
        assert_eq!(make_bar(0.0, 4), "[░░░░]");
        assert_eq!(make_bar(0.5, 4), "[██░░]");
        assert_eq!(make_bar(1.5, 4), "[████]");
    }

    #[test]
    fn test_read_deletion_list() {
        let text = "/data/a.txt\n\n# comment\nsub/b\n  /data/c  \n";
        let deleted = read_deletion_list(text, Path::new("/data"));
        assert_eq!(deleted.len(), 3);
        assert!(deleted.contains(Path::new("/data/a.txt")));
        assert!(deleted.contains(Path::new("/data/sub/b")));
        assert!(deleted.contains(Path::new("/data/c")));
    }

    #[test]
    fn test_scan_args_config() {
        let cli = Cli::parse_from([
            "sizemap", "scan", "/tmp", "--depth", "2", "--min-size", "1KB", "-x", "target/",
            "--no-ignore-file", "--one-file-system",
        ]);
        let Command::Scan { scan, .. } = cli.command else {
            panic!("expected scan command");
        };
        let config = scan.config().unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp"));
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.min_size, 1024);
        assert_eq!(config.ignore_patterns, vec!["target/".to_string()]);
        assert_eq!(config.ignore_file, None);
        assert!(!config.cross_filesystems);
    }

    #[test]
    fn test_scan_depth_defaults_to_config_default() {
        let cli = Cli::parse_from(["sizemap", "scan", "/tmp"]);
        let Command::Scan {
            scan, show_depth, ..
        } = cli.command
        else {
            panic!("expected scan command");
        };
        assert_eq!(scan.config().unwrap().max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(show_depth, 3);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let cli = Cli::parse_from(["sizemap", "scan", "--depth", "0"]);
        let Command::Scan { scan, .. } = cli.command else {
            panic!("expected scan command");
        };
        assert!(scan.config().is_err());
    }
}
