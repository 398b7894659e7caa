//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Model error from termfold-core.
    #[error(transparent)]
    Core(#[from] termfold_core::Error),

    /// The input token stream is malformed or truncated.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Checkpoint could not be read, written or validated.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Checkpoint was written by an incompatible format version.
    #[error("Checkpoint format version {found} is not supported (expected {expected})")]
    CheckpointVersion {
        /// Version found in the file.
        found: u32,
        /// Version this build reads and writes.
        expected: u32,
    },

    /// A failed batch could not be written to its spillover file.
    #[error("Spill error: {0}")]
    Spill(String),

    /// The upload worker stopped before all batches were handed over.
    #[error("Upload aborted: {reason} ({unsent_rows} rows left unsent)")]
    UploadAborted {
        /// Why the worker stopped.
        reason: String,
        /// Rows that never reached the destination or a spill file.
        unsent_rows: usize,
    },

    /// ClickHouse client error.
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
