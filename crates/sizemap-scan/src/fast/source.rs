//! Producers of raw enumeration output.

use std::io::{self, Cursor};
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sizemap_core::{ScanConfig, ScanError, ScanWarning};

use super::record::parse_diagnostic_line;

/// Filter the entry enumeration applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFilter {
    /// Deepest level reported below the root.
    pub max_depth: u32,
    /// Files smaller than this are left out; directories never are.
    pub min_size: u64,
    /// Descend into other filesystems.
    pub cross_filesystems: bool,
}

impl From<&ScanConfig> for EntryFilter {
    fn from(config: &ScanConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            min_size: config.min_size,
            cross_filesystems: config.cross_filesystems,
        }
    }
}

/// Something that can produce the two line streams of a fast scan.
///
/// `entries` yields `SIZE<TAB>TYPE<TAB>PATH` lines for every entry passing
/// the filter, `totals` yields `SIZE<TAB>PATH` lines with the true recursive
/// total of every directory down to the filter's depth, whatever the size
/// filter.
pub trait RecordSource: Send + Sync {
    /// Open the entry enumeration stream.
    fn entries(&self, root: &Path, filter: &EntryFilter) -> Result<RecordStream, ScanError>;

    /// Open the directory totals stream.
    fn totals(&self, root: &Path, filter: &EntryFilter) -> Result<RecordStream, ScanError>;

    /// Bytes per unit in the totals stream.
    fn total_unit(&self) -> u64 {
        1
    }
}

/// An incrementally read, line-oriented byte stream.
pub struct RecordStream {
    label: &'static str,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    child: Option<Child>,
    diagnostics: Option<JoinHandle<Vec<ScanWarning>>>,
    line: Vec<u8>,
}

impl RecordStream {
    /// Serve a fixed buffer.
    pub fn from_bytes(label: &'static str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            label,
            reader: Box::new(Cursor::new(bytes.into())),
            child: None,
            diagnostics: None,
            line: Vec::new(),
        }
    }

    /// Read a spawned process's standard output.
    ///
    /// Standard error, if piped, is read concurrently: per-entry complaints
    /// become warnings (see [`RecordStream::diagnostics`]), the rest is logged.
    pub fn from_child(label: &'static str, mut child: Child) -> Result<Self, ScanError> {
        let stdout = child.stdout.take().ok_or_else(|| ScanError::Other {
            message: format!("{label}: standard output was not captured"),
        })?;
        let diagnostics = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(label, stderr)));
        Ok(Self {
            label,
            reader: Box::new(BufReader::new(stdout)),
            child: Some(child),
            diagnostics,
            line: Vec::new(),
        })
    }

    /// Name used in logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
            return Ok(None);
        }
        while matches!(self.line.last(), Some(b'\n' | b'\r')) {
            self.line.pop();
        }
        Ok(Some(self.line.as_slice()))
    }

    /// Stop the producing process, if any.
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.kill().await {
                debug!(stream = self.label, error = %err, "kill failed");
            }
        }
    }

    /// Per-entry warnings the producer printed on standard error.
    ///
    /// Waits for standard error to close, so call it once output is
    /// exhausted or the producer was killed. Later calls return nothing.
    pub async fn diagnostics(&mut self) -> Vec<ScanWarning> {
        let Some(handle) = self.diagnostics.take() else {
            return Vec::new();
        };
        match handle.await {
            Ok(warnings) => warnings,
            Err(err) => {
                debug!(stream = self.label, error = %err, "stderr reader failed");
                Vec::new()
            }
        }
    }

    /// Wait for the producer to exit. `None` for in-memory streams.
    pub async fn finish(mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.take() {
            Some(mut child) => child.wait().await.map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("label", &self.label)
            .field("process", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

async fn collect_stderr(label: &'static str, stderr: ChildStderr) -> Vec<ScanWarning> {
    let mut warnings = Vec::new();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_diagnostic_line(&line) {
            Some(warning) => {
                debug!(stream = label, path = %warning.path.display(), "{}", warning.message);
                warnings.push(warning);
            }
            None => warn!(stream = label, "{}", line),
        }
    }
    warnings
}

/// Streams from the host's `find` and `du`.
///
/// Entry lines come from `find -printf '%s\t%y\t%p\n'` (GNU find), totals
/// from `du -k -d DEPTH` and are scaled to bytes.
#[derive(Debug, Clone)]
pub struct ProcessSource {
    find: String,
    du: String,
}

impl ProcessSource {
    /// Use `find` and `du` from `PATH`.
    pub fn new() -> Result<Self, ScanError> {
        Self::with_tools("find", "du")
    }

    /// Use specific tool binaries (e.g. `gfind` on BSD hosts).
    pub fn with_tools(find: impl Into<String>, du: impl Into<String>) -> Result<Self, ScanError> {
        if !cfg!(unix) {
            return Err(ScanError::UnsupportedPlatform {
                platform: std::env::consts::OS,
            });
        }
        Ok(Self {
            find: find.into(),
            du: du.into(),
        })
    }

    /// Arguments passed to `find`.
    pub fn find_args(root: &Path, filter: &EntryFilter) -> Vec<String> {
        let mut args = vec![root.to_string_lossy().into_owned()];
        if !filter.cross_filesystems {
            args.push("-xdev".to_string());
        }
        args.push("-maxdepth".to_string());
        args.push(filter.max_depth.to_string());
        if filter.min_size > 0 {
            args.extend(
                ["(", "-type", "d", "-o", "-size"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            args.push(format!("+{}c", filter.min_size - 1));
            args.push(")".to_string());
        }
        args.push("-printf".to_string());
        args.push("%s\\t%y\\t%p\\n".to_string());
        args
    }

    /// Arguments passed to `du`.
    pub fn du_args(root: &Path, filter: &EntryFilter) -> Vec<String> {
        let mut args = vec!["-k".to_string()];
        if !filter.cross_filesystems {
            args.push("-x".to_string());
        }
        // Totals below the entry depth could never be attached to a record.
        args.push("-d".to_string());
        args.push(filter.max_depth.to_string());
        args.push(root.to_string_lossy().into_owned());
        args
    }

    fn spawn(&self, label: &'static str, program: &str, args: &[String]) -> Result<RecordStream, ScanError> {
        debug!(stream = label, program, ?args, "spawning");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::io(program, e))?;
        RecordStream::from_child(label, child)
    }
}

impl RecordSource for ProcessSource {
    fn entries(&self, root: &Path, filter: &EntryFilter) -> Result<RecordStream, ScanError> {
        self.spawn("find", &self.find, &Self::find_args(root, filter))
    }

    fn totals(&self, root: &Path, filter: &EntryFilter) -> Result<RecordStream, ScanError> {
        self.spawn("du", &self.du, &Self::du_args(root, filter))
    }

    fn total_unit(&self) -> u64 {
        1024
    }
}

/// Canned output, for tests and replaying captured scans.
///
/// A stream set to `None` fails to open, like a tool that cannot be spawned.
#[derive(Debug, Clone, Default)]
pub struct BufferedSource {
    entries: Option<Vec<u8>>,
    totals: Option<Vec<u8>>,
    unit: u64,
}

impl BufferedSource {
    /// Serve the given entry and totals output.
    pub fn new(entries: impl Into<Vec<u8>>, totals: impl Into<Vec<u8>>) -> Self {
        Self {
            entries: Some(entries.into()),
            totals: Some(totals.into()),
            unit: 1,
        }
    }

    /// Make the entry stream fail to open.
    pub fn without_entries(mut self) -> Self {
        self.entries = None;
        self
    }

    /// Make the totals stream fail to open.
    pub fn without_totals(mut self) -> Self {
        self.totals = None;
        self
    }

    /// Scale totals by `unit` bytes.
    pub fn with_unit(mut self, unit: u64) -> Self {
        self.unit = unit;
        self
    }

    fn open(label: &'static str, bytes: &Option<Vec<u8>>) -> Result<RecordStream, ScanError> {
        match bytes {
            Some(bytes) => Ok(RecordStream::from_bytes(label, bytes.clone())),
            None => Err(ScanError::Other {
                message: format!("{label}: no output available"),
            }),
        }
    }
}

impl RecordSource for BufferedSource {
    fn entries(&self, _root: &Path, _filter: &EntryFilter) -> Result<RecordStream, ScanError> {
        Self::open("entries", &self.entries)
    }

    fn totals(&self, _root: &Path, _filter: &EntryFilter) -> Result<RecordStream, ScanError> {
        Self::open("totals", &self.totals)
    }

    fn total_unit(&self) -> u64 {
        self.unit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(min_size: u64) -> EntryFilter {
        EntryFilter {
            max_depth: 3,
            min_size,
            cross_filesystems: true,
        }
    }

    #[tokio::test]
    async fn test_lines_are_read_incrementally() {
        let mut stream = RecordStream::from_bytes("t", "one\r\ntwo\n\nthree");
        assert_eq!(stream.next_line().await.unwrap(), Some(&b"one"[..]));
        assert_eq!(stream.next_line().await.unwrap(), Some(&b"two"[..]));
        assert_eq!(stream.next_line().await.unwrap(), Some(&b""[..]));
        assert_eq!(stream.next_line().await.unwrap(), Some(&b"three"[..]));
        assert_eq!(stream.next_line().await.unwrap(), None);
        assert!(stream.finish().await.unwrap().is_none());
    }

    #[test]
    fn test_find_args_without_size_filter() {
        let args = ProcessSource::find_args(Path::new("/data"), &filter(0));
        assert_eq!(args, ["/data", "-maxdepth", "3", "-printf", "%s\\t%y\\t%p\\n"]);
    }

    #[test]
    fn test_find_args_keep_directories() {
        let args = ProcessSource::find_args(Path::new("/data"), &filter(1024));
        let joined = args.join(" ");
        assert!(joined.contains("( -type d -o -size +1023c )"));
    }

    #[test]
    fn test_du_args() {
        let mut f = filter(0);
        f.cross_filesystems = false;
        assert_eq!(
            ProcessSource::du_args(Path::new("/data"), &f),
            ["-k", "-x", "-d", "3", "/data"]
        );
    }

    #[test]
    fn test_du_args_follow_entry_depth() {
        let mut f = filter(0);
        f.max_depth = 1;
        assert_eq!(ProcessSource::du_args(Path::new("/data"), &f), ["-k", "-d", "1", "/data"]);
    }

    #[tokio::test]
    async fn test_buffered_source_missing_stream() {
        let source = BufferedSource::new("", "").without_totals();
        assert!(source.entries(Path::new("/"), &filter(0)).is_ok());
        assert!(source.totals(Path::new("/"), &filter(0)).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_stream_reports_exit() {
        let child = Command::new("sh")
            .args(["-c", "printf 'a\\nb\\n'; exit 3"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stream = RecordStream::from_child("sh", child).unwrap();
        let mut lines = Vec::new();
        while let Some(line) = stream.next_line().await.unwrap() {
            lines.push(line.to_vec());
        }
        assert_eq!(lines, [b"a".to_vec(), b"b".to_vec()]);
        let status = stream.finish().await.unwrap().unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_stderr_becomes_warnings() {
        let script = "printf 'ok\\n'; \
            echo \"find: '/x/locked': Permission denied\" >&2; \
            echo 'find: some general notice' >&2; \
            exit 1";
        let child = Command::new("sh")
            .args(["-c", script])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stream = RecordStream::from_child("sh", child).unwrap();
        while stream.next_line().await.unwrap().is_some() {}

        let warnings = stream.diagnostics().await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, std::path::PathBuf::from("/x/locked"));
        assert_eq!(warnings[0].kind, sizemap_core::SkipReason::PermissionDenied);
        assert!(stream.diagnostics().await.is_empty());
        assert_eq!(stream.finish().await.unwrap().unwrap().code(), Some(1));
    }
}
