//! Core types for sizemap.
//!
//! This crate provides the fundamental data structures shared by the
//! scanners and their callers: directory nodes, scan results, configuration,
//! the error taxonomy, and in-place pruning of a tree after deletions.

mod config;
mod error;
mod node;
pub mod surgery;
mod tree;

pub use config::{
    DEFAULT_CONCURRENCY, DEFAULT_IGNORE_FILE, DEFAULT_MAX_DEPTH, ScanConfig, ScanConfigBuilder,
};
pub use error::{ScanError, ScanWarning, SkipReason};
pub use node::{DirectoryNode, Expansion, NodeKind, Walk, name_of};
pub use surgery::{prune, prune_in_place};
pub use tree::{DirectoryTree, ScanStrategy, TreeStats};
