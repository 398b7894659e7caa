//! Core types and shared utilities for the termfold report pipeline.
//!
//! This crate provides:
//! - The record and aggregation model ([`Record`], [`AggregationKey`], [`SubItem`],
//!   [`AggregationEntry`])
//! - The top-K [`Aggregator`]
//! - Flattened [`OutputRow`]s and the [`RunMetadata`] stamped onto them
//! - Prometheus metrics helpers
//! - Shared error types

mod aggregate;
mod error;
pub mod metrics;
mod record;
mod row;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Sub-items retained per aggregation key.
pub const TOP_K: usize = 3;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 500;

/// Click-share rank assigned when a record omits it.
pub const DEFAULT_CLICK_SHARE_RANK: u32 = 999;

/// Marketplace id used when none is configured (amazon.com).
pub const DEFAULT_MARKETPLACE_ID: &str = "ATVPDKIKX0DER";

pub use aggregate::Aggregator;
pub use error::{Error, Result};
pub use record::{AggregationEntry, AggregationKey, Record, SubItem, truncate_title};
pub use row::{DATE_FORMAT, OUTPUT_COLUMNS, OutputRow, RunMetadata};
