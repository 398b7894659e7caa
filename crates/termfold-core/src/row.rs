//! Flattened output rows and the run metadata stamped onto them.

use crate::record::{AggregationEntry, AggregationKey, SubItem};
use crate::{DEFAULT_MARKETPLACE_ID, Error, Result, TOP_K};
use chrono::{Days, NaiveDate};
use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// Date format used for the week columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-run metadata copied onto every output row.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub report_id: String,
    pub marketplace_id: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
}

impl RunMetadata {
    /// Build run metadata, defaulting the week end to six days after the start.
    pub fn new(
        report_id: impl Into<String>,
        marketplace_id: Option<String>,
        week_start: NaiveDate,
        week_end: Option<NaiveDate>,
    ) -> Result<Self> {
        let report_id = report_id.into();
        if report_id.trim().is_empty() {
            return Err(Error::InvalidMetadata("report id is empty".to_string()));
        }

        let week_end = match week_end {
            Some(end) => end,
            None => week_start.checked_add_days(Days::new(6)).ok_or_else(|| {
                Error::InvalidMetadata(format!("week start {week_start} is out of range"))
            })?,
        };
        if week_end < week_start {
            return Err(Error::InvalidMetadata(format!(
                "week end {week_end} is before week start {week_start}"
            )));
        }

        Ok(Self {
            report_id,
            marketplace_id: marketplace_id.unwrap_or_else(|| DEFAULT_MARKETPLACE_ID.to_string()),
            week_start,
            week_end,
        })
    }
}

/// Row structure matching the ClickHouse `search_terms` table.
///
/// Carries three fixed slots of clicked-item columns; unused slots hold empty
/// strings and zero shares.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct OutputRow {
    pub search_term: String,
    pub search_frequency_rank: u64,
    pub department: String,
    pub report_id: String,
    pub marketplace_id: String,
    pub week_start_date: String,
    pub week_end_date: String,
    pub ingested_at: u32, // DateTime is stored as Unix timestamp

    pub clicked_asin_1: String,
    pub product_title_1: String,
    pub click_share_1: f64,
    pub conversion_share_1: f64,

    pub clicked_asin_2: String,
    pub product_title_2: String,
    pub click_share_2: f64,
    pub conversion_share_2: f64,

    pub clicked_asin_3: String,
    pub product_title_3: String,
    pub click_share_3: f64,
    pub conversion_share_3: f64,

    pub total_click_share: f64,
    pub total_conversion_share: f64,
}

/// Number of columns in an [`OutputRow`].
pub const OUTPUT_COLUMNS: usize = 8 + 4 * TOP_K + 2;

impl OutputRow {
    /// Flatten an aggregation entry into a row.
    pub fn from_entry(
        key: &AggregationKey,
        entry: &AggregationEntry,
        metadata: &RunMetadata,
        ingested_at: u32,
    ) -> Self {
        let items = entry.items();
        let [s1, s2, s3] = [0, 1, 2].map(|i| Slot::from(items.get(i)));

        Self {
            search_term: key.search_term.clone(),
            search_frequency_rank: entry.search_frequency_rank,
            department: entry.department.clone(),
            report_id: metadata.report_id.clone(),
            marketplace_id: metadata.marketplace_id.clone(),
            week_start_date: metadata.week_start.format(DATE_FORMAT).to_string(),
            week_end_date: metadata.week_end.format(DATE_FORMAT).to_string(),
            ingested_at,

            clicked_asin_1: s1.item_id,
            product_title_1: s1.title,
            click_share_1: s1.click_share,
            conversion_share_1: s1.conversion_share,

            clicked_asin_2: s2.item_id,
            product_title_2: s2.title,
            click_share_2: s2.click_share,
            conversion_share_2: s2.conversion_share,

            clicked_asin_3: s3.item_id,
            product_title_3: s3.title,
            click_share_3: s3.click_share,
            conversion_share_3: s3.conversion_share,

            total_click_share: entry.total_click_share(),
            total_conversion_share: entry.total_conversion_share(),
        }
    }

    /// Check the row against the destination's column constraints.
    ///
    /// Shares must be finite and within `[0, 1]`; the search term must be
    /// non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.search_term.trim().is_empty() {
            return Err(Error::InvalidField {
                field: "search_term",
                reason: "empty".to_string(),
            });
        }

        let shares = [
            ("click_share_1", self.click_share_1),
            ("conversion_share_1", self.conversion_share_1),
            ("click_share_2", self.click_share_2),
            ("conversion_share_2", self.conversion_share_2),
            ("click_share_3", self.click_share_3),
            ("conversion_share_3", self.conversion_share_3),
        ];
        for (field, value) in shares {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidField {
                    field,
                    reason: format!("value {value} outside [0, 1]"),
                });
            }
        }

        for (field, value) in [
            ("total_click_share", self.total_click_share),
            ("total_conversion_share", self.total_conversion_share),
        ] {
            if !value.is_finite() {
                return Err(Error::InvalidField {
                    field,
                    reason: format!("non-finite value {value}"),
                });
            }
        }

        Ok(())
    }
}

/// One flattened sub-item slot.
#[derive(Default)]
struct Slot {
    item_id: String,
    title: String,
    click_share: f64,
    conversion_share: f64,
}

impl From<Option<&SubItem>> for Slot {
    fn from(item: Option<&SubItem>) -> Self {
        match item {
            Some(item) => Self {
                item_id: item.item_id.clone(),
                title: item.title.clone(),
                click_share: item.click_share,
                conversion_share: item.conversion_share,
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RunMetadata {
        RunMetadata::new(
            "report-1",
            None,
            NaiveDate::from_ymd_opt(2025, 7, 6).unwrap(),
            None,
        )
        .unwrap()
    }

    fn entry_with(items: &[(&str, u32, f64)]) -> (AggregationKey, AggregationEntry) {
        let key = AggregationKey::new("Electronics", "usb cable", 7);
        let mut entry = AggregationEntry::new(&key);
        for (id, rank, share) in items {
            entry.insert(
                SubItem {
                    item_id: id.to_string(),
                    title: format!("{id} title"),
                    click_share: *share,
                    conversion_share: *share / 10.0,
                    click_share_rank: *rank,
                },
                TOP_K,
            );
        }
        (key, entry)
    }

    // =========================================================================
    // RunMetadata
    // =========================================================================

    #[test]
    fn test_metadata_defaults() {
        let meta = metadata();
        assert_eq!(meta.marketplace_id, DEFAULT_MARKETPLACE_ID);
        assert_eq!(meta.week_end, NaiveDate::from_ymd_opt(2025, 7, 12).unwrap());
    }

    #[test]
    fn test_metadata_rejects_empty_report_id() {
        let start = NaiveDate::from_ymd_opt(2025, 7, 6).unwrap();
        let err = RunMetadata::new("  ", None, start, None).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn test_metadata_rejects_end_before_start() {
        let start = NaiveDate::from_ymd_opt(2025, 7, 6).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let err = RunMetadata::new("r", None, start, Some(end)).unwrap_err();
        assert!(err.to_string().contains("before week start"));
    }

    // =========================================================================
    // Row flattening
    // =========================================================================

    #[test]
    fn test_from_entry_fills_slots() {
        let (key, entry) = entry_with(&[("B01", 1, 0.2), ("B02", 2, 0.15)]);
        let row = OutputRow::from_entry(&key, &entry, &metadata(), 1_700_000_000);

        assert_eq!(row.search_term, "usb cable");
        assert_eq!(row.department, "Electronics");
        assert_eq!(row.search_frequency_rank, 7);
        assert_eq!(row.week_start_date, "2025-07-06");
        assert_eq!(row.week_end_date, "2025-07-12");
        assert_eq!(row.clicked_asin_1, "B01");
        assert_eq!(row.clicked_asin_2, "B02");
        assert_eq!(row.clicked_asin_3, "");
        assert_eq!(row.product_title_3, "");
        assert_eq!(row.click_share_3, 0.0);
        assert!((row.total_click_share - 0.35).abs() < 1e-9);
        assert_eq!(row.ingested_at, 1_700_000_000);
    }

    #[test]
    fn test_output_column_count() {
        assert_eq!(OUTPUT_COLUMNS, 22);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_validate_accepts_normal_row() {
        let (key, entry) = entry_with(&[("B01", 1, 0.2)]);
        let row = OutputRow::from_entry(&key, &entry, &metadata(), 0);
        assert!(row.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_share() {
        let (key, entry) = entry_with(&[("B01", 1, 0.2)]);
        let mut row = OutputRow::from_entry(&key, &entry, &metadata(), 0);
        row.click_share_2 = 1.5;

        let err = row.validate().unwrap_err();
        assert!(err.to_string().contains("click_share_2"));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let (key, entry) = entry_with(&[("B01", 1, 0.2)]);
        let mut row = OutputRow::from_entry(&key, &entry, &metadata(), 0);
        row.total_conversion_share = f64::NAN;
        assert!(row.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_search_term() {
        let (key, entry) = entry_with(&[("B01", 1, 0.2)]);
        let mut row = OutputRow::from_entry(&key, &entry, &metadata(), 0);
        row.search_term = String::new();
        assert!(matches!(
            row.validate(),
            Err(Error::InvalidField { field: "search_term", .. })
        ));
    }
}
