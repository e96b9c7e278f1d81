//! Error types for scanning operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that fail a whole scan attempt.
///
/// Problems with individual entries never show up here; those are
/// collected as [`ScanWarning`]s on the resulting tree.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Scan root does not exist.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Permission denied for the scan root.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Generic I/O error on the scan root.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The fast path cannot run on this host.
    #[error("Fast scan is not supported on this platform ({platform})")]
    UnsupportedPlatform { platform: &'static str },

    /// No enumerated record matched the scan root.
    #[error("Scan root missing from enumerated records: {path}")]
    MissingRoot { path: PathBuf },

    /// Both enumeration streams came back empty.
    #[error("Enumeration produced no records for {path}: {message}")]
    EnumerationFailure { path: PathBuf, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Scan was cancelled.
    #[error("Operation interrupted")]
    Interrupted,

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether a caller should retry the scan with the portable walker.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform { .. }
                | Self::EnumerationFailure { .. }
                | Self::MissingRoot { .. }
        )
    }
}

/// Why an entry was left out of a scan result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Permission was denied.
    PermissionDenied,
    /// Entry disappeared between enumeration and stat.
    Vanished,
    /// Error reading metadata.
    MetadataError,
    /// Error reading a directory.
    ReadError,
    /// Entry lives on another filesystem.
    CrossFilesystem,
    /// Fast-path output line that could not be parsed.
    MalformedRecord,
    /// Scan was cancelled before the entry was visited.
    Cancelled,
}

impl SkipReason {
    /// Classify an I/O error.
    pub fn from_io(error: &std::io::Error, fallback: SkipReason) -> Self {
        match error.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::NotFound => Self::Vanished,
            _ => fallback,
        }
    }
}

/// Non-fatal problem encountered during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Why the entry was skipped.
    pub kind: SkipReason,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: SkipReason) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning for a failed metadata call.
    pub fn metadata_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::new(
            path,
            format!("Metadata error: {error}"),
            SkipReason::from_io(error, SkipReason::MetadataError),
        )
    }

    /// Create a warning for a directory that could not be read.
    pub fn read_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::new(
            path,
            format!("Read error: {error}"),
            SkipReason::from_io(error, SkipReason::ReadError),
        )
    }

    /// Create a warning for an unparsable fast-path line.
    pub fn malformed(line: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            PathBuf::new(),
            format!("Malformed record {line:?}: {reason}"),
            SkipReason::MalformedRecord,
        )
    }

    /// Create a warning for an entry dropped by cancellation.
    pub fn cancelled(path: impl Into<PathBuf>) -> Self {
        Self::new(path, "Scan cancelled", SkipReason::Cancelled)
    }
}
