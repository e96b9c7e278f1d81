//! Fast path: external enumeration and size tools.
//!
//! One process lists every entry under the root (within the depth and size
//! filter) and a second reports the true total of every directory. Both
//! outputs are parsed line by line as they arrive and the hierarchy is
//! rebuilt from the flat records afterwards.

mod builder;
mod enumerator;
mod record;
mod scanner;
mod source;

pub use builder::TreeBuilder;
pub use enumerator::{
    EnumeratedRecord, Enumeration, EnumerationSummary, StreamKind, StreamSummary,
    StreamingEnumerator,
};
pub use record::{
    DirectoryTotal, FlatPathRecord, RecordError, RecordKind, parse_diagnostic_line,
    parse_entry_line, parse_total_line,
};
pub use scanner::FastScanner;
pub use source::{BufferedSource, EntryFilter, ProcessSource, RecordSource, RecordStream};
