//! Spillover files for batches the destination never received.
//!
//! Each transport-failed batch is written verbatim, as a JSON array of rows,
//! to its own file under the spill directory:
//!
//! ```text
//! <spill-dir>/failed_batch_<report>_<unix-ts>_<seq>.json
//! ```
//!
//! The files can be replayed later by any loader that reads JSON rows. A name
//! already taken, for instance by an earlier run in the same second, moves on
//! to the next sequence number.

use crate::{Error, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use termfold_core::OutputRow;
use tracing::{debug, warn};

/// Writes failed batches to individual files.
#[derive(Debug)]
pub struct SpillWriter {
    dir: PathBuf,
    report_tag: String,
    next_seq: usize,
    files_written: usize,
}

impl SpillWriter {
    /// Create a writer for `report_id` under `dir`. The directory is created
    /// on the first spill.
    pub fn new(dir: impl Into<PathBuf>, report_id: &str) -> Self {
        Self {
            dir: dir.into(),
            report_tag: filename_safe(report_id),
            next_seq: 0,
            files_written: 0,
        }
    }

    /// Number of spill files written so far.
    pub fn files_written(&self) -> usize {
        self.files_written
    }

    /// Write `batch` to a new spill file and return its path.
    pub fn write_batch(&mut self, batch: &[OutputRow]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Spill(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let timestamp = Utc::now().timestamp();
        loop {
            let path = self.dir.join(format!(
                "failed_batch_{}_{}_{:04}.json",
                self.report_tag, timestamp, self.next_seq
            ));
            self.next_seq += 1;

            match write_rows(&path, batch) {
                Ok(()) => {
                    self.files_written += 1;
                    warn!("Spilled {} rows to {}", batch.len(), path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already exists, trying the next name", path.display());
                }
                Err(e) => {
                    return Err(Error::Spill(format!(
                        "failed to write {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
    }
}

fn write_rows(path: &Path, rows: &[OutputRow]) -> std::io::Result<()> {
    let file = File::options().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, rows)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Replace anything but ASCII alphanumerics, `-` and `_` with `_`.
fn filename_safe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Read a spill file back into rows.
pub fn read_spill_file(path: &Path) -> Result<Vec<OutputRow>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
