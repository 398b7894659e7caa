//! Top-K aggregation of report records.
//!
//! The [`Aggregator`] owns the map from [`AggregationKey`] to
//! [`AggregationEntry`]. Every ingest enforces the top-K bound immediately, so
//! memory grows with the number of distinct keys rather than the number of
//! records.
//!
//! The aggregator serializes as a sequence of `[key, entry]` pairs, which is
//! the form stored in checkpoints.

use crate::record::{AggregationEntry, AggregationKey, Record, SubItem};
use crate::row::{OutputRow, RunMetadata};
use crate::TOP_K;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Keyed top-K accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    entries: BTreeMap<AggregationKey, AggregationEntry>,
    top_k: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    /// Create an empty aggregator retaining [`TOP_K`] items per key.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            top_k: TOP_K,
        }
    }

    /// Rebuild an aggregator from previously snapshotted pairs.
    pub fn restore(pairs: impl IntoIterator<Item = (AggregationKey, AggregationEntry)>) -> Self {
        Self {
            entries: pairs.into_iter().collect(),
            top_k: TOP_K,
        }
    }

    /// Get the entry for `key`, creating an empty one if absent.
    pub fn entry(&mut self, key: AggregationKey) -> &mut AggregationEntry {
        self.entries
            .entry(key)
            .or_insert_with_key(AggregationEntry::new)
    }

    /// Look up an entry without creating it.
    pub fn get(&self, key: &AggregationKey) -> Option<&AggregationEntry> {
        self.entries.get(key)
    }

    /// Fold one record into its entry.
    ///
    /// Repeated observations of the same item at the same click-share rank
    /// collapse into one slot: the later record replaces the retained one in
    /// place instead of being appended. Re-ingesting records already seen is
    /// therefore a no-op, which lets a resumed run re-scan its input.
    pub fn ingest(&mut self, record: Record) {
        let item = SubItem::from_record(&record);
        let top_k = self.top_k;
        self.entry(record.key()).insert(item, top_k);
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&AggregationKey, &AggregationEntry)> {
        self.entries.iter()
    }

    /// Copy out every key/entry pair; the inverse of [`Aggregator::restore`].
    pub fn snapshot(&self) -> Vec<(AggregationKey, AggregationEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Drain every entry into output rows, in key order.
    ///
    /// The map is empty afterwards; a second flush returns nothing.
    pub fn flush(&mut self, metadata: &RunMetadata, ingested_at: u32) -> Vec<OutputRow> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(key, entry)| OutputRow::from_entry(&key, &entry, metadata, ingested_at))
            .collect()
    }
}

impl Serialize for Aggregator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de> Deserialize<'de> for Aggregator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(AggregationKey, AggregationEntry)>::deserialize(deserializer)?;
        Ok(Self::restore(pairs))
    }
}
