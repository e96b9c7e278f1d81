//! Flat records parsed from enumeration output.

use std::path::PathBuf;

use thiserror::Error;

use sizemap_core::{ScanWarning, SkipReason};

/// Entry type as reported by the enumeration tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    File,
    Directory,
    Symlink,
    /// Sockets, devices, fifos.
    Other,
    /// The tool did not say; classification falls back to "has children".
    Unknown,
}

impl RecordKind {
    /// Map a `find -printf %y` type letter.
    pub fn from_type_letter(letter: u8) -> Self {
        match letter {
            b'f' => Self::File,
            b'd' => Self::Directory,
            b'l' => Self::Symlink,
            b'b' | b'c' | b'p' | b's' | b'D' => Self::Other,
            _ => Self::Unknown,
        }
    }
}

/// One entry from the enumeration stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatPathRecord {
    pub path: PathBuf,
    pub size: u64,
    pub kind: RecordKind,
}

/// One directory total from the size stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTotal {
    pub path: PathBuf,
    pub size: u64,
}

/// Why a line could not be turned into a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid size {0:?}")]
    InvalidSize(String),
}

/// Parse `SIZE<TAB>TYPE<TAB>PATH`.
///
/// A line with only `SIZE<TAB>PATH` yields [`RecordKind::Unknown`]. The
/// path is everything after the last expected separator, so it may itself
/// contain tabs.
pub fn parse_entry_line(line: &[u8]) -> Result<FlatPathRecord, RecordError> {
    let mut fields = line.splitn(3, |b| *b == b'\t');
    let size = parse_size(fields.next())?;
    let second = fields.next().ok_or(RecordError::MissingField("path"))?;

    let (kind, path) = match (second, fields.next()) {
        ([letter], Some(path)) => (RecordKind::from_type_letter(*letter), path.to_vec()),
        (head, Some(tail)) => {
            let mut path = head.to_vec();
            path.push(b'\t');
            path.extend_from_slice(tail);
            (RecordKind::Unknown, path)
        }
        (path, None) => (RecordKind::Unknown, path.to_vec()),
    };
    if path.is_empty() {
        return Err(RecordError::MissingField("path"));
    }

    Ok(FlatPathRecord {
        path: path_from_bytes(&path),
        size,
        kind,
    })
}

/// Parse `SIZE<TAB>PATH` (or space-separated), scaling the size by `unit`.
pub fn parse_total_line(line: &[u8], unit: u64) -> Result<DirectoryTotal, RecordError> {
    let split = line
        .iter()
        .position(|b| *b == b'\t')
        .or_else(|| line.iter().position(|b| *b == b' '));
    let (size, path) = match split {
        Some(at) => (&line[..at], &line[at + 1..]),
        None => return Err(RecordError::MissingField("path")),
    };
    let path = trim_leading_spaces(path);
    if path.is_empty() {
        return Err(RecordError::MissingField("path"));
    }

    Ok(DirectoryTotal {
        path: path_from_bytes(path),
        size: parse_size(Some(size))?.saturating_mul(unit),
    })
}

/// Turn a tool's per-entry complaint into a warning.
///
/// Recognises the `tool: 'PATH': reason` and `tool: cannot read directory
/// 'PATH': reason` shapes printed by `find` and `du`, with plain or
/// typographic quotes. Anything else yields `None`.
pub fn parse_diagnostic_line(line: &str) -> Option<ScanWarning> {
    let (start, open) = line
        .char_indices()
        .find(|(_, c)| matches!(*c, '‘' | '\'' | '`' | '"'))?;
    let close = match open {
        '‘' => '’',
        '`' => '\'',
        other => other,
    };
    let rest = &line[start + open.len_utf8()..];
    let end = rest.find(close)?;
    let path = &rest[..end];
    if path.is_empty() {
        return None;
    }
    let reason = rest[end + close.len_utf8()..].trim_start_matches(':').trim();
    let lowered = reason.to_ascii_lowercase();
    let kind = if lowered.contains("permission denied") {
        SkipReason::PermissionDenied
    } else if lowered.contains("no such file") {
        SkipReason::Vanished
    } else {
        SkipReason::ReadError
    };
    Some(ScanWarning::new(path, line.trim(), kind))
}

fn parse_size(field: Option<&[u8]>) -> Result<u64, RecordError> {
    let field = field.ok_or(RecordError::MissingField("size"))?;
    let text = std::str::from_utf8(field)
        .map_err(|_| RecordError::InvalidSize(String::from_utf8_lossy(field).into_owned()))?;
    text.trim()
        .parse()
        .map_err(|_| RecordError::InvalidSize(text.to_string()))
}

fn trim_leading_spaces(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != b' ' && *b != b'\t').unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
