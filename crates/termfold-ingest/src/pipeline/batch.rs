//! Fixed-size batching of output rows.

use termfold_core::OutputRow;

/// Default rows per upload batch.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Split `rows` into ordered batches of at most `batch_size` rows.
///
/// Batches are copied out one at a time, so `rows` stays intact until the
/// caller knows what was delivered. A `batch_size` of zero is treated as one.
pub fn take_batches(rows: &[OutputRow], batch_size: usize) -> Batches<'_> {
    Batches {
        chunks: rows.chunks(batch_size.max(1)),
    }
}

/// Iterator returned by [`take_batches`].
pub struct Batches<'a> {
    chunks: std::slice::Chunks<'a, OutputRow>,
}

impl Iterator for Batches<'_> {
    type Item = Vec<OutputRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(<[OutputRow]>::to_vec)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use termfold_core::{Aggregator, Record, RunMetadata};

    /// `n` distinct rows, one per search term.
    pub(crate) fn sample_rows(n: usize) -> Vec<OutputRow> {
        let mut agg = Aggregator::new();
        for i in 0..n {
            let mut record = Record::new(format!("term {i:04}"));
            record.department = "Electronics".to_string();
            record.clicked_item_id = format!("B{i:09}");
            record.click_share_rank = 1;
            record.click_share = 0.25;
            record.conversion_share = 0.05;
            agg.ingest(record);
        }
        let meta = RunMetadata::new(
            "report-test",
            None,
            NaiveDate::from_ymd_opt(2025, 7, 6).unwrap(),
            None,
        )
        .unwrap();
        agg.flush(&meta, 1_750_000_000)
    }

    #[test]
    fn test_five_rows_batch_size_two() {
        let sizes: Vec<usize> = take_batches(&sample_rows(5), 2).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_batches_preserve_order() {
        let rows = sample_rows(7);
        let flattened: Vec<OutputRow> = take_batches(&rows, 3).flatten().collect();
        assert_eq!(flattened, rows);
    }

    #[test]
    fn test_exact_multiple() {
        let rows = sample_rows(6);
        let batches = take_batches(&rows, 3);
        assert_eq!(batches.len(), 2);
        assert!(batches.map(|b| b.len()).all(|n| n == 3));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(take_batches(&[], 10).count(), 0);
    }

    #[test]
    fn test_zero_batch_size_treated_as_one() {
        assert_eq!(take_batches(&sample_rows(3), 0).count(), 3);
    }
}
