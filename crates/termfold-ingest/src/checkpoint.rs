//! Crash-recovery checkpoints.
//!
//! A checkpoint is a versioned JSON snapshot of a run's aggregation state,
//! stored next to the input as `<input-path>.checkpoint`. It is overwritten on
//! every save and deleted once a run completes, so its presence on startup
//! means the previous run was interrupted.
//!
//! # Atomic Writes
//!
//! Saves never leave a partially written checkpoint behind:
//! 1. Write to `<input-path>.checkpoint.tmp` and fsync
//! 2. Rename over `<input-path>.checkpoint`
//!
//! # Phases
//!
//! A `streaming` checkpoint holds the aggregation map as of some record
//! count. Resuming from it re-scans the input from the start on top of the
//! restored map; replaying records that were already folded in leaves the map
//! unchanged.
//!
//! An `uploading` checkpoint is written once the input has been fully
//! consumed and the map drained into rows. It carries the rows still to be
//! uploaded, and resuming from it skips parsing altogether.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use termfold_core::{Aggregator, OutputRow};
use tracing::{debug, info};

/// Checkpoint format version written by this build.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const CHECKPOINT_SUFFIX: &str = ".checkpoint";
const TMP_SUFFIX: &str = ".tmp";

/// How far a run had progressed when the checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    #[default]
    Streaming,
    Uploading,
}

impl std::fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointPhase::Streaming => write!(f, "streaming"),
            CheckpointPhase::Uploading => write!(f, "uploading"),
        }
    }
}

/// Persisted run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Format version; always serialized first.
    pub format_version: u32,

    /// Report this state belongs to.
    pub report_id: String,

    pub phase: CheckpointPhase,

    /// Records folded into the map during the pass that wrote this state.
    pub records_processed: u64,

    /// When the checkpoint was written.
    pub saved_at: DateTime<Utc>,

    /// Aggregation map, as `[key, entry]` pairs.
    pub aggregator: Aggregator,

    /// Output rows not yet handed to the destination.
    pub pending_rows: Vec<OutputRow>,
}

impl CheckpointState {
    /// Fresh state for `report_id`.
    pub fn new(report_id: impl Into<String>) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            report_id: report_id.into(),
            phase: CheckpointPhase::Streaming,
            records_processed: 0,
            saved_at: Utc::now(),
            aggregator: Aggregator::new(),
            pending_rows: Vec::new(),
        }
    }
}

/// Reads only the version field, skipping the rest of the document.
#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

/// Manages the checkpoint file for one input.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    /// Manager for the checkpoint belonging to `input`.
    pub fn for_input(input: &Path) -> Self {
        let mut path = OsString::from(input.as_os_str());
        path.push(CHECKPOINT_SUFFIX);
        Self {
            path: PathBuf::from(path),
        }
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn tmp_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(TMP_SUFFIX);
        PathBuf::from(path)
    }

    /// Whether a checkpoint file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the checkpoint, if one exists.
    ///
    /// Fails if the file cannot be parsed, was written by another format
    /// version, or belongs to a different report.
    pub fn load(&self, report_id: &str) -> Result<Option<CheckpointState>> {
        if !self.exists() {
            debug!("No checkpoint at {}", self.path.display());
            return Ok(None);
        }

        let probe: VersionProbe = self.read_json()?;
        if probe.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(Error::CheckpointVersion {
                found: probe.format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }

        let state: CheckpointState = self.read_json()?;
        if state.report_id != report_id {
            return Err(Error::Checkpoint(format!(
                "{} belongs to report '{}', not '{}'",
                self.path.display(),
                state.report_id,
                report_id
            )));
        }

        info!(
            "Loaded checkpoint {} (phase={}, {} keys, {} pending rows, saved {})",
            self.path.display(),
            state.phase,
            state.aggregator.len(),
            state.pending_rows.len(),
            state.saved_at
        );

        Ok(Some(state))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let file = File::open(&self.path).map_err(|e| self.error("open", e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| self.error("parse", e))
    }

    /// Atomically replace the checkpoint with `state`.
    pub fn save(&self, state: &CheckpointState) -> Result<()> {
        let tmp = self.tmp_path();

        let file = File::create(&tmp).map_err(|e| self.error("create", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, state).map_err(|e| self.error("serialize", e))?;
        writer.flush().map_err(|e| self.error("write", e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| self.error("sync", e))?;

        fs::rename(&tmp, &self.path).map_err(|e| self.error("rename", e))?;

        metrics::counter!("termfold_checkpoints_saved_total").increment(1);
        debug!(
            "Saved checkpoint {} (phase={}, {} records, {} keys)",
            self.path.display(),
            state.phase,
            state.records_processed,
            state.aggregator.len()
        );

        Ok(())
    }

    /// Delete the checkpoint and any leftover temp file.
    pub fn remove(&self) -> Result<()> {
        for path in [self.path.clone(), self.tmp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(self.error("remove", e)),
            }
        }
        Ok(())
    }

    fn error(&self, action: &str, err: impl std::fmt::Display) -> Error {
        Error::Checkpoint(format!(
            "failed to {} {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}
