//! Upload pipeline components.
//!
//! This module contains everything between a flushed aggregation map and the
//! destination:
//!
//! - [`take_batches`] - Splits output rows into bounded batches
//! - [`RowSink`] - Destination trait with a three-way [`SendOutcome`]
//! - [`ClickHouseSink`] / [`NdjsonSink`] - Sink implementations
//! - [`SpillWriter`] - Writes transport-failed batches to local files
//! - [`Uploader`] - Worker thread consuming batches from a bounded queue

mod batch;
mod clickhouse;
mod ndjson;
mod sink;
mod spill;
mod uploader;

pub use batch::{Batches, DEFAULT_BATCH_SIZE, take_batches};
pub use self::clickhouse::{ClickHouseConfig, ClickHouseSink};
pub use ndjson::NdjsonSink;
pub use sink::{RowRejection, RowSink, SendOutcome, outcome_after_write, partition_valid};
pub use spill::{SpillWriter, read_spill_file};
pub use uploader::{
    DEFAULT_QUEUE_CAPACITY, MAX_LOGGED_REJECTIONS, UploadAbort, UploadReport, Uploader,
};
