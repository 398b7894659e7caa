//! Record source adapters.
//!
//! A source reads raw report input and hands each completed [`Record`] to
//! the pipeline through a handler callback, one record at a time, so that no
//! more than one in-progress object is ever buffered.
//!
//! # Available Sources
//!
//! - [`ReportSource`] - Streams the data array of a (possibly compressed) JSON report

mod report;

pub use report::{Compression, DEFAULT_ARRAY_FIELD, ReportConfig, ReportSource, parse_report};

use crate::Result;
use termfold_core::Record;

/// A source of report records.
pub trait RecordSource {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Stream records from this source, calling the handler for each one.
    ///
    /// Returning `Err` from the handler aborts the stream and that error is
    /// returned from `process` unchanged.
    fn process<F>(&mut self, handler: F) -> Result<SourceStats>
    where
        F: FnMut(Record) -> Result<()>;
}

/// Statistics from processing a record source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Objects encountered in the data array.
    pub objects_seen: u64,

    /// Records handed to the handler.
    pub records_emitted: u64,

    /// Objects dropped because they carried no search term.
    pub records_dropped: u64,

    /// Size of the input file on disk, when known.
    pub bytes_read: Option<u64>,
}
