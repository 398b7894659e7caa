//! Destination abstraction for output batches.
//!
//! A [`RowSink`] makes exactly one attempt per batch and classifies the
//! result as a [`SendOutcome`]. Sinks never retry; what to do with a failed
//! batch is decided by the [`Uploader`](super::Uploader).

use termfold_core::OutputRow;

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Every row was accepted.
    Delivered { rows: usize },

    /// The batch was accepted but some rows were rejected individually.
    Partial {
        delivered: usize,
        rejected: Vec<RowRejection>,
    },

    /// The batch as a whole did not reach the destination.
    TransportFailed { error: String },
}

impl SendOutcome {
    /// Label used for the `outcome` metric.
    pub fn label(&self) -> &'static str {
        match self {
            SendOutcome::Delivered { .. } => "delivered",
            SendOutcome::Partial { .. } => "partial",
            SendOutcome::TransportFailed { .. } => "transport_failed",
        }
    }
}

/// A single row rejected by the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// Index of the row within its batch.
    pub index: usize,
    pub reason: String,
}

/// A destination for output rows.
pub trait RowSink: Send {
    /// Human-readable name for this sink (used in logs).
    fn name(&self) -> &'static str;

    /// Deliver one batch. Called once per batch, never retried.
    fn send(&mut self, batch: &[OutputRow]) -> SendOutcome;
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send(&mut self, batch: &[OutputRow]) -> SendOutcome {
        (**self).send(batch)
    }
}

/// Split a batch into rows that pass [`OutputRow::validate`] and rejections.
pub fn partition_valid(batch: &[OutputRow]) -> (Vec<&OutputRow>, Vec<RowRejection>) {
    let mut valid = Vec::with_capacity(batch.len());
    let mut rejected = Vec::new();

    for (index, row) in batch.iter().enumerate() {
        match row.validate() {
            Ok(()) => valid.push(row),
            Err(e) => rejected.push(RowRejection {
                index,
                reason: e.to_string(),
            }),
        }
    }

    (valid, rejected)
}

/// Outcome for a batch whose valid rows were all written.
pub fn outcome_after_write(delivered: usize, rejected: Vec<RowRejection>) -> SendOutcome {
    if rejected.is_empty() {
        SendOutcome::Delivered { rows: delivered }
    } else {
        SendOutcome::Partial {
            delivered,
            rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::tests::sample_rows;

    #[test]
    fn test_partition_all_valid() {
        let rows = sample_rows(3);
        let (valid, rejected) = partition_valid(&rows);
        assert_eq!(valid.len(), 3);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_partition_reports_indices() {
        let mut rows = sample_rows(4);
        rows[1].click_share_1 = 2.0;
        rows[3].search_term = String::new();

        let (valid, rejected) = partition_valid(&rows);
        assert_eq!(valid.len(), 2);
        let indices: Vec<usize> = rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(rejected[0].reason.contains("click_share_1"));
    }

    #[test]
    fn test_outcome_after_write() {
        assert_eq!(
            outcome_after_write(5, Vec::new()),
            SendOutcome::Delivered { rows: 5 }
        );

        let rejection = RowRejection {
            index: 2,
            reason: "bad".to_string(),
        };
        let outcome = outcome_after_write(4, vec![rejection.clone()]);
        assert_eq!(
            outcome,
            SendOutcome::Partial {
                delivered: 4,
                rejected: vec![rejection]
            }
        );
        assert_eq!(outcome.label(), "partial");
    }
}
