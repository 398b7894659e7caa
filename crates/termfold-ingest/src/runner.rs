//! Run driver.
//!
//! [`Pipeline::run`] takes one report from input file to destination:
//!
//! ```text
//! INIT ─► [RESUME] ─► STREAMING ─► FLUSHING ─► UPLOADING ─► DONE
//!                          │            │            │
//!                          └────────────┴────────────┴─► FAILED
//! ```
//!
//! Streaming and aggregation run on the calling thread, which is the only
//! owner of the aggregation map; checkpoints are taken between records. The
//! upload phase hands batches to the [`Uploader`] worker.
//!
//! Any failure after INIT writes a last checkpoint before the error is
//! returned, unless the failure was the checkpoint itself.

use crate::checkpoint::{CheckpointManager, CheckpointPhase, CheckpointState};
use crate::pipeline::{
    DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY, RowSink, SpillWriter, UploadAbort, UploadReport,
    Uploader, take_batches,
};
use crate::source::{RecordSource, ReportConfig, ReportSource, SourceStats};
use crate::{Error, Result};
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use termfold_core::RunMetadata;
use termfold_core::metrics::{increment, set_gauge};
use tracing::{error, info, warn};

/// Default number of records between checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 100_000;

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input and parsing settings.
    pub source: ReportConfig,

    /// Metadata stamped on every output row.
    pub metadata: RunMetadata,

    /// Maximum rows per upload batch.
    pub batch_size: usize,

    /// Records between checkpoints (0 disables periodic checkpoints).
    pub checkpoint_interval: u64,

    /// Batches buffered between the driver and the upload worker.
    pub queue_capacity: usize,

    /// Directory for spillover files.
    pub spill_dir: PathBuf,

    /// Resume from an existing checkpoint.
    pub resume: bool,
}

impl PipelineConfig {
    /// Configuration for `input` with default tuning. Spill files go to a
    /// `failed_batches` directory next to the input.
    pub fn new(input: impl Into<PathBuf>, metadata: RunMetadata) -> Self {
        let input = input.into();
        let spill_dir = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join("failed_batches");

        Self {
            source: ReportConfig {
                input,
                ..Default::default()
            },
            metadata,
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            spill_dir,
            resume: true,
        }
    }

    pub fn input(&self) -> &Path {
        &self.source.input
    }
}

/// Driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Resume,
    Streaming,
    Flushing,
    Uploading,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::Resume => "RESUME",
            RunState::Streaming => "STREAMING",
            RunState::Flushing => "FLUSHING",
            RunState::Uploading => "UPLOADING",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// How a completed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every batch reached the destination.
    Clean,
    /// Input was exhausted but some batches only reached spill files.
    Degraded { spilled_batches: usize },
}

/// What a completed run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Phase of the checkpoint the run resumed from, if any.
    pub resumed_from: Option<CheckpointPhase>,

    /// Parser statistics; `None` when streaming was skipped.
    pub source: Option<SourceStats>,

    /// Distinct keys drained from the aggregation map.
    pub keys_flushed: usize,

    /// Rows handed to the uploader.
    pub rows_flushed: usize,

    pub checkpoints_saved: u64,

    pub upload: UploadReport,

    pub elapsed: Duration,
}

impl RunSummary {
    pub fn outcome(&self) -> RunOutcome {
        if self.upload.is_degraded() {
            RunOutcome::Degraded {
                spilled_batches: self.upload.batches_spilled,
            }
        } else {
            RunOutcome::Clean
        }
    }
}

/// A configured run over one input with one sink.
pub struct Pipeline<S> {
    config: PipelineConfig,
    sink: S,
}

impl<S: RowSink + 'static> Pipeline<S> {
    pub fn new(config: PipelineConfig, sink: S) -> Self {
        Self { config, sink }
    }

    /// Execute the run to completion.
    pub fn run(self) -> Result<RunSummary> {
        let Pipeline { config, sink } = self;
        let started = Instant::now();
        set_gauge("termfold_running", 1.0);

        let mut run = Run::new(&config);
        let result = run.execute(sink);

        set_gauge("termfold_running", 0.0);
        match result {
            Ok(mut summary) => {
                summary.elapsed = started.elapsed();
                Ok(summary)
            }
            Err(e) => {
                run.transition(RunState::Failed);
                error!("Run failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Mutable state of one execution.
struct Run<'a> {
    config: &'a PipelineConfig,
    checkpoints: CheckpointManager,
    state: RunState,
    summary: RunSummary,
}

impl<'a> Run<'a> {
    fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            checkpoints: CheckpointManager::for_input(config.input()),
            state: RunState::Init,
            summary: RunSummary::default(),
        }
    }

    fn transition(&mut self, next: RunState) {
        info!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }

    fn execute<S: RowSink + 'static>(&mut self, sink: S) -> Result<RunSummary> {
        info!(
            "Starting run for report '{}' from {}",
            self.config.metadata.report_id,
            self.config.input().display()
        );

        let mut state = match self.resume()? {
            Some(state) => state,
            None => CheckpointState::new(self.config.metadata.report_id.clone()),
        };

        if state.phase == CheckpointPhase::Streaming {
            self.transition(RunState::Streaming);
            if let Err(e) = self.stream(&mut state) {
                return Err(self.fail(&mut state, e));
            }

            self.transition(RunState::Flushing);
            self.flush(&mut state)?;
        }

        self.transition(RunState::Uploading);
        self.upload(sink, &mut state)?;

        if let Err(e) = self.checkpoints.remove() {
            warn!("{}; remove it before re-running this report", e);
        }
        self.transition(RunState::Done);

        Ok(std::mem::take(&mut self.summary))
    }

    /// Load the checkpoint when resuming is enabled.
    fn resume(&mut self) -> Result<Option<CheckpointState>> {
        if !self.config.resume {
            if self.checkpoints.exists() {
                warn!(
                    "Ignoring existing checkpoint {} (resume disabled)",
                    self.checkpoints.path().display()
                );
            }
            return Ok(None);
        }

        let Some(state) = self.checkpoints.load(&self.config.metadata.report_id)? else {
            return Ok(None);
        };

        self.transition(RunState::Resume);
        self.summary.resumed_from = Some(state.phase);
        match state.phase {
            CheckpointPhase::Streaming => info!(
                "Re-scanning input on top of {} restored keys ({} records covered)",
                state.aggregator.len(),
                state.records_processed
            ),
            CheckpointPhase::Uploading => info!(
                "Input already consumed; uploading {} pending rows",
                state.pending_rows.len()
            ),
        }

        Ok(Some(state))
    }

    /// Stream every record into the aggregation map.
    fn stream(&mut self, state: &mut CheckpointState) -> Result<()> {
        let mut source = ReportSource::new(self.config.source.clone());
        let interval = self.config.checkpoint_interval;
        state.records_processed = 0;

        let stats = source.process(|record| {
            state.aggregator.ingest(record);
            state.records_processed += 1;

            if interval > 0 && state.records_processed.is_multiple_of(interval) {
                self.save(state)?;
                set_gauge("termfold_keys", state.aggregator.len() as f64);
            }
            Ok(())
        })?;

        info!(
            "Streaming complete from {} source: {} records, {} dropped, {} keys",
            source.name(),
            stats.records_emitted,
            stats.records_dropped,
            state.aggregator.len()
        );
        increment("termfold_records_total", stats.records_emitted);
        increment("termfold_records_dropped_total", stats.records_dropped);
        set_gauge("termfold_keys", state.aggregator.len() as f64);

        self.summary.source = Some(stats);
        Ok(())
    }

    /// Drain the map into pending rows and checkpoint them.
    fn flush(&mut self, state: &mut CheckpointState) -> Result<()> {
        let ingested_at = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let keys = state.aggregator.len();
        let rows = state.aggregator.flush(&self.config.metadata, ingested_at);
        info!("Flushed {} keys into {} rows", keys, rows.len());

        self.summary.keys_flushed = keys;
        state.pending_rows.extend(rows);
        state.phase = CheckpointPhase::Uploading;
        set_gauge("termfold_keys", 0.0);

        self.save(state)
    }

    /// Send every pending row through the upload worker.
    fn upload<S: RowSink + 'static>(&mut self, sink: S, state: &mut CheckpointState) -> Result<()> {
        let spill = SpillWriter::new(&self.config.spill_dir, &self.config.metadata.report_id);
        let uploader = match Uploader::spawn(sink, spill, self.config.queue_capacity) {
            Ok(uploader) => uploader,
            Err(e) => return Err(self.fail(state, e)),
        };

        self.summary.rows_flushed = state.pending_rows.len();
        info!(
            "Uploading {} rows in batches of at most {}",
            state.pending_rows.len(),
            self.config.batch_size
        );

        // Pending rows stay in the checkpoint state until the worker accounts for them
        let mut worker_gone = false;
        for batch in take_batches(&state.pending_rows, self.config.batch_size) {
            if uploader.send(batch).is_err() {
                worker_gone = true;
                break;
            }
        }

        let abort = match uploader.finish() {
            Ok(report) if !worker_gone => {
                state.pending_rows.clear();
                self.summary.upload = report;
                return Ok(());
            }
            Ok(report) => UploadAbort {
                reason: "upload worker exited early".to_string(),
                rows_disposed: report.rows_disposed,
                report,
            },
            Err(abort) => abort,
        };

        let disposed = abort.rows_disposed.min(state.pending_rows.len());
        state.pending_rows.drain(..disposed);
        self.summary.upload = abort.report;

        let err = Error::UploadAborted {
            reason: abort.reason,
            unsent_rows: state.pending_rows.len(),
        };
        Err(self.fail(state, err))
    }

    fn save(&mut self, state: &mut CheckpointState) -> Result<()> {
        state.saved_at = Utc::now();
        self.checkpoints.save(state)?;
        self.summary.checkpoints_saved += 1;
        Ok(())
    }

    /// Write a final checkpoint for `err`, then hand the error back.
    fn fail(&mut self, state: &mut CheckpointState, err: Error) -> Error {
        if matches!(err, Error::Checkpoint(_) | Error::CheckpointVersion { .. }) {
            return err;
        }

        match self.save(state) {
            Ok(()) => warn!(
                "Saved {} checkpoint to {} before aborting",
                state.phase,
                self.checkpoints.path().display()
            ),
            Err(save_err) => error!("Could not save checkpoint after failure: {}", save_err),
        }
        err
    }
}
