//! Scan configuration types.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Default depth ceiling for a scan request.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

/// Default number of filesystem calls allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default root-relative ignore rule file.
pub const DEFAULT_IGNORE_FILE: &str = ".gitignore";

/// Configuration for scanning operations.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Root path to scan.
    pub root: PathBuf,

    /// Maximum depth of expanded nodes below the root.
    #[builder(default = "DEFAULT_MAX_DEPTH")]
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Minimum file size reported by the fast path. The portable walker ignores it.
    #[builder(default = "0")]
    #[serde(default)]
    pub min_size: u64,

    /// Root-relative ignore rule file (gitignore syntax).
    #[builder(default = "Some(DEFAULT_IGNORE_FILE.to_string())")]
    #[serde(default = "default_ignore_file")]
    pub ignore_file: Option<String>,

    /// Extra ignore rules applied after the rule file.
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Maximum filesystem calls in flight.
    #[builder(default = "DEFAULT_CONCURRENCY")]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cross filesystem boundaries.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub cross_filesystems: bool,

    /// Attribute a hardlinked file's size to the first link only.
    #[builder(default = "false")]
    #[serde(default)]
    pub count_hardlinks_once: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_ignore_file() -> Option<String> {
    Some(DEFAULT_IGNORE_FILE.to_string())
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            _ => {}
        }
        if self.max_depth == Some(0) {
            return Err("Maximum depth must be at least 1".to_string());
        }
        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning a path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            min_size: 0,
            ignore_file: default_ignore_file(),
            ignore_patterns: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            cross_filesystems: true,
            count_hardlinks_once: false,
        }
    }

    /// Set the depth ceiling.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the fast-path size filter.
    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    /// Check values that deserialization or direct construction can get wrong.
    pub fn validate(&self) -> Result<(), ScanError> {
        let message = if self.root.as_os_str().is_empty() {
            "Root path cannot be empty"
        } else if self.max_depth == 0 {
            "Maximum depth must be at least 1"
        } else if self.concurrency == 0 {
            "Concurrency must be at least 1"
        } else {
            return Ok(());
        };
        Err(ScanError::InvalidConfig {
            message: message.to_string(),
        })
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
