//! Concurrent consumption of the entry and totals streams.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sizemap_core::{ScanError, ScanWarning};

use super::record::{DirectoryTotal, FlatPathRecord, RecordError, parse_entry_line, parse_total_line};
use super::source::{EntryFilter, ProcessSource, RecordSource, RecordStream};

/// Records buffered between the readers and the consumer.
const CHANNEL_CAPACITY: usize = 1024;

/// Which of the two streams a record or summary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Entries,
    Totals,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entries => write!(f, "entries"),
            Self::Totals => write!(f, "totals"),
        }
    }
}

/// A parsed line from either stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumeratedRecord {
    Entry(FlatPathRecord),
    Total(DirectoryTotal),
}

/// How one stream ended.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub kind: StreamKind,
    /// Records successfully parsed.
    pub records: u64,
    /// Lines that could not be parsed.
    pub warnings: Vec<ScanWarning>,
    /// Producer exit code; `None` for in-memory streams or signals.
    pub exit_code: Option<i32>,
    /// Whether the producer reported success.
    pub success: bool,
    /// Open or read failure.
    pub error: Option<String>,
}

impl StreamSummary {
    fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            records: 0,
            warnings: Vec::new(),
            exit_code: None,
            success: true,
            error: None,
        }
    }

    fn failed(kind: StreamKind, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::new(kind)
        }
    }
}

/// Outcome of a completed enumeration.
#[derive(Debug, Clone, Default)]
pub struct EnumerationSummary {
    /// Entry records produced.
    pub entries: u64,
    /// Directory totals produced.
    pub totals: u64,
    /// Unparsable lines from both streams.
    pub warnings: Vec<ScanWarning>,
    /// Per-stream failures that were tolerated.
    pub failures: Vec<String>,
}

impl EnumerationSummary {
    fn absorb(&mut self, stream: StreamSummary) {
        match stream.kind {
            StreamKind::Entries => self.entries += stream.records,
            StreamKind::Totals => self.totals += stream.records,
        }
        if let Some(error) = stream.error {
            self.failures.push(format!("{}: {error}", stream.kind));
        } else if !stream.success {
            let code = stream
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            self.failures.push(format!("{}: exited with {code}", stream.kind));
        }
        self.warnings.extend(stream.warnings);
    }
}

/// Runs a [`RecordSource`] and turns its output into records.
#[derive(Clone)]
pub struct StreamingEnumerator {
    source: Arc<dyn RecordSource>,
    cancel: CancellationToken,
}

impl StreamingEnumerator {
    /// Enumerate with the given source.
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self {
            source,
            cancel: CancellationToken::new(),
        }
    }

    /// Enumerate with the host's tools.
    ///
    /// Fails with [`ScanError::UnsupportedPlatform`] where they are not
    /// available; callers should then use the portable walker.
    pub fn system() -> Result<Self, ScanError> {
        Ok(Self::new(Arc::new(ProcessSource::new()?)))
    }

    /// Stop reading and kill producers when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start both streams for `root`.
    ///
    /// The two streams are read concurrently; records arrive on the
    /// returned [`Enumeration`] in whatever order they are parsed.
    pub fn enumerate(&self, root: &Path, filter: &EntryFilter) -> Enumeration {
        let (tx, records) = mpsc::channel(CHANNEL_CAPACITY);
        let mut readers = JoinSet::new();
        let unit = self.source.total_unit();

        match self.source.entries(root, filter) {
            Ok(stream) => {
                readers.spawn(pump(
                    StreamKind::Entries,
                    stream,
                    tx.clone(),
                    self.cancel.clone(),
                    |line| parse_entry_line(line).map(EnumeratedRecord::Entry),
                ));
            }
            Err(err) => {
                warn!(root = %root.display(), error = %err, "entry enumeration unavailable");
                let summary = StreamSummary::failed(StreamKind::Entries, err.to_string());
                readers.spawn(async move { summary });
            }
        }

        match self.source.totals(root, filter) {
            Ok(stream) => {
                readers.spawn(pump(
                    StreamKind::Totals,
                    stream,
                    tx.clone(),
                    self.cancel.clone(),
                    move |line| parse_total_line(line, unit).map(EnumeratedRecord::Total),
                ));
            }
            Err(err) => {
                warn!(root = %root.display(), error = %err, "directory totals unavailable");
                let summary = StreamSummary::failed(StreamKind::Totals, err.to_string());
                readers.spawn(async move { summary });
            }
        }

        drop(tx);
        Enumeration {
            root: root.to_path_buf(),
            records,
            readers,
            cancel: self.cancel.clone(),
        }
    }
}

impl std::fmt::Debug for StreamingEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingEnumerator")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Read one stream to the end, forwarding parsed records.
///
/// The bounded channel applies back-pressure: a slow consumer stalls the
/// read, which in turn stalls the producer on its pipe.
async fn pump<F>(
    kind: StreamKind,
    mut stream: RecordStream,
    tx: mpsc::Sender<EnumeratedRecord>,
    cancel: CancellationToken,
    parse: F,
) -> StreamSummary
where
    F: Fn(&[u8]) -> Result<EnumeratedRecord, RecordError> + Send + 'static,
{
    let mut summary = StreamSummary::new(kind);
    let mut stopped = false;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stopped = true;
                break;
            }
            line = stream.next_line() => line,
        };
        match line {
            Ok(Some([])) => continue,
            Ok(Some(bytes)) => match parse(bytes) {
                Ok(record) => {
                    summary.records += 1;
                    if tx.send(record).await.is_err() {
                        stopped = true;
                        break;
                    }
                }
                Err(err) => {
                    let warning = ScanWarning::malformed(&String::from_utf8_lossy(bytes), &err);
                    debug!(stream = %kind, "{}", warning.message);
                    summary.warnings.push(warning);
                }
            },
            Ok(None) => break,
            Err(err) => {
                summary.error = Some(format!("read failed: {err}"));
                summary.success = false;
                break;
            }
        }
    }

    if stopped {
        stream.kill().await;
    }
    summary.warnings.extend(stream.diagnostics().await);
    let label = stream.label();
    match stream.finish().await {
        Ok(Some(status)) => {
            summary.exit_code = status.code();
            summary.success &= status.success() || stopped;
        }
        Ok(None) => {}
        Err(err) => {
            summary.error = Some(format!("wait failed: {err}"));
            summary.success = false;
        }
    }
    debug!(stream = label, records = summary.records, success = summary.success, "stream finished");
    summary
}

/// Records of a running enumeration.
///
/// Consume it as a [`Stream`], then call [`Enumeration::finish`] to learn
/// whether the result is usable.
pub struct Enumeration {
    root: PathBuf,
    records: mpsc::Receiver<EnumeratedRecord>,
    readers: JoinSet<StreamSummary>,
    cancel: CancellationToken,
}

impl Stream for Enumeration {
    type Item = EnumeratedRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_recv(cx)
    }
}

impl Enumeration {
    /// Wait for both producers and apply the failure rule.
    ///
    /// A failing or non-zero-exit stream is tolerated as long as at least
    /// one record came from either stream. Records not yet consumed are
    /// discarded.
    pub async fn finish(mut self) -> Result<EnumerationSummary, ScanError> {
        self.records.close();
        while self.records.recv().await.is_some() {}

        let mut summary = EnumerationSummary::default();
        while let Some(joined) = self.readers.join_next().await {
            match joined {
                Ok(stream) => summary.absorb(stream),
                Err(err) => summary.failures.push(format!("reader task failed: {err}")),
            }
        }

        if self.cancel.is_cancelled() {
            return Err(ScanError::Interrupted);
        }
        if summary.entries == 0 && summary.totals == 0 {
            let message = if summary.failures.is_empty() {
                "both streams were empty".to_string()
            } else {
                summary.failures.join("; ")
            };
            return Err(ScanError::EnumerationFailure {
                path: self.root,
                message,
            });
        }
        for failure in &summary.failures {
            warn!(root = %self.root.display(), "partial enumeration: {failure}");
        }
        Ok(summary)
    }
}
