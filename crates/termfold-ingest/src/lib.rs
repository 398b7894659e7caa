//! termfold ingestion pipeline.
//!
//! This crate turns a large search-terms report into per-term rows holding
//! the top clicked items, and bulk-loads those rows into ClickHouse.
//!
//! # Modules
//!
//! - [`source`] - Streaming report parser
//! - [`checkpoint`] - Crash-recovery checkpoints
//! - [`pipeline`] - Batching, sinks, spillover and the upload worker
//! - [`runner`] - The run driver tying it all together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ReportSource   │  Streams the record array (plain, gzip or zstd)
//! └────────┬────────┘
//!          │  Record
//!          ▼
//! ┌─────────────────┐
//! │   Aggregator    │  (department, term, rank) → top-3 clicked items
//! └────────┬────────┘     ──► CheckpointManager (every N records)
//!          │  flush
//!          ▼
//! ┌─────────────────┐
//! │    Uploader     │  Bounded queue → RowSink (ClickHouse / NDJSON)
//! └────────┬────────┘
//!          │  transport failure
//!          ▼
//! ┌─────────────────┐
//! │   SpillWriter   │  One JSON file per failed batch
//! └─────────────────┘
//! ```

pub mod checkpoint;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod source;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use checkpoint::{CHECKPOINT_FORMAT_VERSION, CheckpointManager, CheckpointPhase, CheckpointState};

pub use pipeline::{
    ClickHouseConfig, ClickHouseSink, NdjsonSink, RowRejection, RowSink, SendOutcome, SpillWriter,
    UploadReport, Uploader, take_batches,
};

pub use runner::{Pipeline, PipelineConfig, RunOutcome, RunState, RunSummary};

pub use source::{Compression, RecordSource, ReportConfig, ReportSource, SourceStats};
