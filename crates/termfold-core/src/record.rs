//! Record and aggregation model types.
//!
//! A [`Record`] is one parsed element of the report's data array. Records are
//! folded into [`AggregationEntry`] values keyed by [`AggregationKey`], each
//! entry retaining at most [`TOP_K`](crate::TOP_K) [`SubItem`]s ordered by
//! click-share rank.

use crate::{DEFAULT_CLICK_SHARE_RANK, MAX_TITLE_CHARS};
use serde::{Deserialize, Serialize};

/// One raw report record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub department: String,
    pub search_term: String,
    pub search_frequency_rank: u64,
    pub clicked_item_id: String,
    pub item_title: String,
    /// Rank of this item within the term's clicks (1 = most clicked).
    pub click_share_rank: u32,
    pub click_share: f64,
    pub conversion_share: f64,
}

impl Record {
    /// Create a record for `search_term` with every other field at its default.
    pub fn new(search_term: impl Into<String>) -> Self {
        Self {
            department: String::new(),
            search_term: search_term.into(),
            search_frequency_rank: 0,
            clicked_item_id: String::new(),
            item_title: String::new(),
            click_share_rank: DEFAULT_CLICK_SHARE_RANK,
            click_share: 0.0,
            conversion_share: 0.0,
        }
    }

    /// The aggregation key this record folds into.
    pub fn key(&self) -> AggregationKey {
        AggregationKey {
            department: self.department.clone(),
            search_term: self.search_term.clone(),
            search_frequency_rank: self.search_frequency_rank,
        }
    }
}

/// Composite grouping key: (department, search term, search-frequency rank).
///
/// Ordering is lexicographic over the fields in declaration order, which is
/// also the order rows come out of a flush.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregationKey {
    pub department: String,
    pub search_term: String,
    pub search_frequency_rank: u64,
}

impl AggregationKey {
    pub fn new(
        department: impl Into<String>,
        search_term: impl Into<String>,
        search_frequency_rank: u64,
    ) -> Self {
        Self {
            department: department.into(),
            search_term: search_term.into(),
            search_frequency_rank,
        }
    }
}

/// A clicked item retained under an aggregation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubItem {
    pub item_id: String,
    /// Title, truncated to [`MAX_TITLE_CHARS`] characters.
    pub title: String,
    pub click_share: f64,
    pub conversion_share: f64,
    pub click_share_rank: u32,
}

impl SubItem {
    /// Build the sub-item carried by `record`.
    pub fn from_record(record: &Record) -> Self {
        Self {
            item_id: record.clicked_item_id.clone(),
            title: truncate_title(&record.item_title),
            click_share: record.click_share,
            conversion_share: record.conversion_share,
            click_share_rank: record.click_share_rank,
        }
    }

    /// Whether `other` is the same observation (same item at the same rank).
    fn same_slot(&self, other: &SubItem) -> bool {
        self.item_id == other.item_id && self.click_share_rank == other.click_share_rank
    }
}

/// Truncate a title to at most [`MAX_TITLE_CHARS`] characters on a char boundary.
pub fn truncate_title(title: &str) -> String {
    match title.char_indices().nth(MAX_TITLE_CHARS) {
        Some((byte_idx, _)) => title[..byte_idx].to_string(),
        None => title.to_string(),
    }
}

/// Accumulated state for one aggregation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationEntry {
    pub department: String,
    pub search_frequency_rank: u64,
    /// Sorted ascending by click-share rank, never longer than the top-K bound.
    items: Vec<SubItem>,
}

impl AggregationEntry {
    /// Create an empty entry for `key`.
    pub fn new(key: &AggregationKey) -> Self {
        Self {
            department: key.department.clone(),
            search_frequency_rank: key.search_frequency_rank,
            items: Vec::new(),
        }
    }

    /// Retained sub-items, best rank first.
    pub fn items(&self) -> &[SubItem] {
        &self.items
    }

    /// Insert `item`, keeping at most `top_k` items sorted by click-share rank.
    ///
    /// Items with equal rank keep their arrival order. An item matching a
    /// retained one on (item id, click-share rank) replaces it in place, so
    /// feeding the same record twice leaves the entry unchanged.
    pub fn insert(&mut self, item: SubItem, top_k: usize) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.same_slot(&item)) {
            *existing = item;
            return;
        }

        self.items.push(item);
        // sort_by_key is stable, which gives arrival-order tie-breaking
        self.items.sort_by_key(|i| i.click_share_rank);
        self.items.truncate(top_k);
    }

    /// Sum of click shares over the retained items.
    pub fn total_click_share(&self) -> f64 {
        self.items.iter().map(|i| i.click_share).sum()
    }

    /// Sum of conversion shares over the retained items.
    pub fn total_conversion_share(&self) -> f64 {
        self.items.iter().map(|i| i.conversion_share).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, rank: u32, share: f64) -> SubItem {
        SubItem {
            item_id: id.to_string(),
            title: format!("title {id}"),
            click_share: share,
            conversion_share: share / 2.0,
            click_share_rank: rank,
        }
    }

    fn ids(entry: &AggregationEntry) -> Vec<&str> {
        entry.items().iter().map(|i| i.item_id.as_str()).collect()
    }

    // =========================================================================
    // Record / key tests
    // =========================================================================

    #[test]
    fn test_record_defaults() {
        let record = Record::new("usb cable");
        assert_eq!(record.search_term, "usb cable");
        assert_eq!(record.click_share_rank, DEFAULT_CLICK_SHARE_RANK);
        assert_eq!(record.search_frequency_rank, 0);
        assert_eq!(record.click_share, 0.0);
    }

    #[test]
    fn test_record_key() {
        let mut record = Record::new("usb cable");
        record.department = "Electronics".to_string();
        record.search_frequency_rank = 42;

        assert_eq!(record.key(), AggregationKey::new("Electronics", "usb cable", 42));
    }

    #[test]
    fn test_key_ordering() {
        let a = AggregationKey::new("Books", "zebra", 9);
        let b = AggregationKey::new("Electronics", "apple", 1);
        let c = AggregationKey::new("Electronics", "apple", 2);
        assert!(a < b);
        assert!(b < c);
    }

    // =========================================================================
    // Title truncation
    // =========================================================================

    #[test]
    fn test_truncate_title_short_untouched() {
        assert_eq!(truncate_title("short"), "short");
    }

    #[test]
    fn test_truncate_title_long() {
        let long = "x".repeat(MAX_TITLE_CHARS + 25);
        assert_eq!(truncate_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_truncate_title_multibyte_boundary() {
        let long = "é".repeat(MAX_TITLE_CHARS + 1);
        let truncated = truncate_title(&long);
        assert_eq!(truncated.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(truncated.len(), MAX_TITLE_CHARS * 2);
    }

    // =========================================================================
    // Entry insertion
    // =========================================================================

    #[test]
    fn test_insert_keeps_sorted_and_bounded() {
        let key = AggregationKey::new("Toys", "lego", 3);
        let mut entry = AggregationEntry::new(&key);

        entry.insert(item("d", 4, 0.05), 3);
        entry.insert(item("b", 2, 0.15), 3);
        entry.insert(item("a", 1, 0.20), 3);
        entry.insert(item("c", 3, 0.10), 3);

        assert_eq!(ids(&entry), vec!["a", "b", "c"]);
        assert!((entry.total_click_share() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_insert_ties_keep_arrival_order() {
        let key = AggregationKey::new("Toys", "lego", 3);
        let mut entry = AggregationEntry::new(&key);

        entry.insert(item("first", 2, 0.1), 3);
        entry.insert(item("second", 2, 0.1), 3);
        entry.insert(item("third", 2, 0.1), 3);
        entry.insert(item("fourth", 2, 0.1), 3);
        entry.insert(item("best", 1, 0.3), 3);

        assert_eq!(ids(&entry), vec!["best", "first", "second"]);
    }

    #[test]
    fn test_insert_same_slot_replaces_in_place() {
        let key = AggregationKey::new("Toys", "lego", 3);
        let mut entry = AggregationEntry::new(&key);

        entry.insert(item("a", 1, 0.2), 3);
        entry.insert(item("b", 2, 0.1), 3);
        entry.insert(item("a", 1, 0.2), 3);

        assert_eq!(ids(&entry), vec!["a", "b"]);
    }

    #[test]
    fn test_same_item_at_different_rank_is_distinct() {
        let key = AggregationKey::new("Toys", "lego", 3);
        let mut entry = AggregationEntry::new(&key);

        entry.insert(item("a", 1, 0.2), 3);
        entry.insert(item("a", 2, 0.1), 3);

        assert_eq!(entry.items().len(), 2);
    }

    #[test]
    fn test_totals_only_count_retained_items() {
        let key = AggregationKey::new("Toys", "lego", 3);
        let mut entry = AggregationEntry::new(&key);

        for rank in 1..=5 {
            entry.insert(item(&format!("i{rank}"), rank, 0.1), 3);
        }

        assert!((entry.total_click_share() - 0.3).abs() < 1e-9);
        assert!((entry.total_conversion_share() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let key = AggregationKey::new("Toys", "lego", 3);
        let mut entry = AggregationEntry::new(&key);
        entry.insert(item("a", 1, 0.2), 3);

        let json = serde_json::to_string(&entry).unwrap();
        let restored: AggregationEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, entry);
    }
}
