//! Local NDJSON sink.
//!
//! Appends one JSON object per row to a file. Used for offline runs and for
//! staging a report before loading it elsewhere.

use super::sink::{RowSink, SendOutcome, outcome_after_write, partition_valid};
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use termfold_core::OutputRow;

/// Row sink writing newline-delimited JSON.
pub struct NdjsonSink {
    path: PathBuf,
    writer: BufWriter<File>,
    rows_written: u64,
}

impl NdjsonSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!("Writing rows to {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            rows_written: 0,
        })
    }

    /// Rows written so far by this sink.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn write_rows(&mut self, rows: &[&OutputRow]) -> std::io::Result<()> {
        for row in rows {
            serde_json::to_writer(&mut self.writer, row)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

impl RowSink for NdjsonSink {
    fn name(&self) -> &'static str {
        "ndjson"
    }

    fn send(&mut self, batch: &[OutputRow]) -> SendOutcome {
        let (valid, rejected) = partition_valid(batch);

        if let Err(e) = self.write_rows(&valid) {
            return SendOutcome::TransportFailed {
                error: format!("{}: {}", self.path.display(), e),
            };
        }
        self.rows_written += valid.len() as u64;

        outcome_after_write(valid.len(), rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::tests::sample_rows;
    use std::fs;
    use tempfile::TempDir;

    fn read_rows(path: &Path) -> Vec<OutputRow> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_writes_one_line_per_row() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rows.ndjson");
        let rows = sample_rows(3);

        let mut sink = NdjsonSink::create(&path).unwrap();
        assert_eq!(sink.send(&rows), SendOutcome::Delivered { rows: 3 });
        assert_eq!(sink.rows_written(), 3);

        assert_eq!(read_rows(&path), rows);
    }

    #[test]
    fn test_appends_across_sinks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rows.ndjson");

        NdjsonSink::create(&path).unwrap().send(&sample_rows(2));
        NdjsonSink::create(&path).unwrap().send(&sample_rows(1));

        assert_eq!(read_rows(&path).len(), 3);
    }

    #[test]
    fn test_invalid_rows_are_not_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rows.ndjson");
        let mut rows = sample_rows(3);
        rows[0].click_share_1 = f64::INFINITY;

        let mut sink = NdjsonSink::create(&path).unwrap();
        let outcome = sink.send(&rows);

        assert!(matches!(outcome, SendOutcome::Partial { delivered: 2, .. }));
        assert_eq!(read_rows(&path).len(), 2);
    }
}
