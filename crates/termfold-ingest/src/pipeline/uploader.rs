//! Background upload worker.
//!
//! The [`Uploader`] owns a [`RowSink`] on a dedicated thread and is fed
//! batches through a bounded channel, so the producer blocks whenever the
//! worker falls behind by more than the queue capacity.
//!
//! Each batch gets exactly one send attempt:
//! - `Delivered` is counted
//! - `Partial` logs the first few rejected rows and counts the rest as delivered
//! - `TransportFailed` writes the batch to a spill file and moves on
//!
//! If a spill write itself fails, the worker stops sending and drains the
//! queue. The caller keeps its own copy of the rows; the abort reports how many
//! leading rows were disposed of, so everything after them is still unsent.
//! A panic inside the worker is reported the same way.

use super::sink::{RowSink, SendOutcome};
use super::spill::SpillWriter;
use crate::Result;
use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use termfold_core::OutputRow;
use termfold_core::metrics::{increment, increment_outcome, set_gauge};
use tracing::{debug, error, info, warn};

/// Rejected rows logged per partial batch.
pub const MAX_LOGGED_REJECTIONS: usize = 5;

/// Default number of batches buffered between producer and worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Totals for an upload phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    /// Batches handed to the sink.
    pub batches_sent: usize,
    pub rows_delivered: usize,
    pub rows_rejected: usize,
    pub batches_spilled: usize,
    pub rows_spilled: usize,
    pub spill_files: Vec<PathBuf>,
    /// Rows of fully handled batches, in queue order.
    pub rows_disposed: usize,
}

impl UploadReport {
    /// Whether any batch ended up in a spill file.
    pub fn is_degraded(&self) -> bool {
        self.batches_spilled > 0
    }
}

/// Why the worker stopped early.
///
/// Rows are disposed of strictly in queue order: the first `rows_disposed`
/// queued rows were delivered, rejected or spilled, and none after them were.
#[derive(Debug)]
pub struct UploadAbort {
    pub reason: String,
    pub rows_disposed: usize,
    /// Progress made before the abort; empty if the worker panicked.
    pub report: UploadReport,
}

/// Handle to the upload worker thread.
pub struct Uploader {
    tx: Sender<Vec<OutputRow>>,
    handle: JoinHandle<std::result::Result<UploadReport, UploadAbort>>,
    disposed: Arc<AtomicUsize>,
}

impl Uploader {
    /// Spawn the worker thread.
    pub fn spawn<S>(sink: S, spill: SpillWriter, queue_capacity: usize) -> Result<Self>
    where
        S: RowSink + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(queue_capacity.max(1));
        let disposed = Arc::new(AtomicUsize::new(0));

        let worker_disposed = Arc::clone(&disposed);
        let handle = thread::Builder::new()
            .name("termfold-upload".to_string())
            .spawn(move || run_worker(sink, spill, rx, &worker_disposed))?;

        Ok(Self {
            tx,
            handle,
            disposed,
        })
    }

    /// Queue a batch, blocking while the queue is full.
    ///
    /// Returns the batch back if the worker thread is gone.
    pub fn send(&self, batch: Vec<OutputRow>) -> std::result::Result<(), Vec<OutputRow>> {
        set_gauge("termfold_upload_queue_depth", self.tx.len() as f64);
        self.tx.send(batch).map_err(|e| e.into_inner())
    }

    /// Close the queue and wait for the worker to drain it.
    pub fn finish(self) -> std::result::Result<UploadReport, UploadAbort> {
        drop(self.tx);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(UploadAbort {
                reason: "upload worker panicked".to_string(),
                rows_disposed: self.disposed.load(Ordering::Acquire),
                report: UploadReport::default(),
            }),
        }
    }
}

fn run_worker<S: RowSink>(
    mut sink: S,
    mut spill: SpillWriter,
    rx: Receiver<Vec<OutputRow>>,
    disposed: &AtomicUsize,
) -> std::result::Result<UploadReport, UploadAbort> {
    info!("Upload worker started (sink={})", sink.name());
    let mut report = UploadReport::default();

    while let Ok(batch) = rx.recv() {
        let batch_number = report.batches_sent + 1;
        let started = Instant::now();
        let outcome = sink.send(&batch);
        metrics::histogram!("termfold_upload_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        increment_outcome("termfold_batches_total", outcome.label());
        report.batches_sent += 1;

        match outcome {
            SendOutcome::Delivered { rows } => {
                debug!("Batch {}: {} rows delivered", batch_number, rows);
                report.rows_delivered += rows;
                increment("termfold_rows_delivered_total", rows as u64);
            }
            SendOutcome::Partial {
                delivered,
                rejected,
            } => {
                warn!(
                    "Batch {}: {} of {} rows rejected",
                    batch_number,
                    rejected.len(),
                    batch.len()
                );
                for rejection in rejected.iter().take(MAX_LOGGED_REJECTIONS) {
                    warn!("  row {}: {}", rejection.index, rejection.reason);
                }
                report.rows_delivered += delivered;
                report.rows_rejected += rejected.len();
                increment("termfold_rows_delivered_total", delivered as u64);
                increment("termfold_rows_rejected_total", rejected.len() as u64);
            }
            SendOutcome::TransportFailed { error: send_error } => {
                error!("Batch {} failed: {}", batch_number, send_error);
                match spill.write_batch(&batch) {
                    Ok(path) => {
                        report.batches_spilled += 1;
                        report.rows_spilled += batch.len();
                        report.spill_files.push(path);
                        increment("termfold_rows_spilled_total", batch.len() as u64);
                    }
                    Err(e) => {
                        error!("Could not spill batch {}: {}", batch_number, e);
                        // Unblock the producer; the rows stay with the caller
                        for _ in rx.iter() {}
                        return Err(UploadAbort {
                            reason: e.to_string(),
                            rows_disposed: report.rows_disposed,
                            report,
                        });
                    }
                }
            }
        }

        report.rows_disposed += batch.len();
        disposed.store(report.rows_disposed, Ordering::Release);
    }

    info!(
        "Upload worker finished: {} batches, {} rows delivered, {} rejected, {} spilled",
        report.batches_sent, report.rows_delivered, report.rows_rejected, report.rows_spilled
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::tests::sample_rows;
    use crate::pipeline::batch::take_batches;
    use crate::pipeline::sink::RowRejection;
    use crate::pipeline::spill::read_spill_file;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Sink that replays scripted outcomes and records every batch it sees.
    struct ScriptedSink {
        script: VecDeque<SendOutcome>,
        seen: Arc<Mutex<Vec<Vec<OutputRow>>>>,
    }

    impl ScriptedSink {
        fn new(script: Vec<SendOutcome>) -> (Self, Arc<Mutex<Vec<Vec<OutputRow>>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Self {
                script: script.into(),
                seen: Arc::clone(&seen),
            };
            (sink, seen)
        }
    }

    impl RowSink for ScriptedSink {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn send(&mut self, batch: &[OutputRow]) -> SendOutcome {
            self.seen.lock().push(batch.to_vec());
            self.script
                .pop_front()
                .unwrap_or(SendOutcome::Delivered { rows: batch.len() })
        }
    }

    fn upload(
        sink: ScriptedSink,
        spill: SpillWriter,
        rows: Vec<OutputRow>,
        batch_size: usize,
    ) -> std::result::Result<UploadReport, UploadAbort> {
        let uploader = Uploader::spawn(sink, spill, 2).unwrap();
        for batch in take_batches(&rows, batch_size) {
            uploader.send(batch).unwrap();
        }
        uploader.finish()
    }

    #[test]
    fn test_all_batches_delivered() {
        let tmp = TempDir::new().unwrap();
        let (sink, seen) = ScriptedSink::new(Vec::new());

        let report = upload(sink, SpillWriter::new(tmp.path(), "r"), sample_rows(5), 2).unwrap();

        let sizes: Vec<usize> = seen.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(report.batches_sent, 3);
        assert_eq!(report.rows_delivered, 5);
        assert_eq!(report.rows_disposed, 5);
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_transport_failure_spills_and_continues() {
        let tmp = TempDir::new().unwrap();
        let spill_dir = tmp.path().join("spill");
        let (sink, seen) = ScriptedSink::new(vec![
            SendOutcome::Delivered { rows: 2 },
            SendOutcome::TransportFailed {
                error: "connection reset".to_string(),
            },
        ]);
        let rows = sample_rows(5);

        let report = upload(sink, SpillWriter::new(&spill_dir, "r"), rows.clone(), 2).unwrap();

        // Exactly one attempt per batch, no retry of the failed one
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(report.batches_sent, 3);
        assert_eq!(report.batches_spilled, 1);
        assert_eq!(report.rows_spilled, 2);
        assert_eq!(report.rows_delivered, 3);
        assert_eq!(report.rows_disposed, 5);
        assert!(report.is_degraded());

        assert_eq!(fs::read_dir(&spill_dir).unwrap().count(), 1);
        let spilled = read_spill_file(&report.spill_files[0]).unwrap();
        assert_eq!(spilled, rows[2..4].to_vec());
    }

    #[test]
    fn test_partial_counts_rejections() {
        let tmp = TempDir::new().unwrap();
        let rejected = (0..7)
            .map(|index| RowRejection {
                index,
                reason: "type mismatch".to_string(),
            })
            .collect();
        let (sink, _) = ScriptedSink::new(vec![SendOutcome::Partial {
            delivered: 3,
            rejected,
        }]);

        let report = upload(sink, SpillWriter::new(tmp.path(), "r"), sample_rows(10), 10).unwrap();

        assert_eq!(report.rows_delivered, 3);
        assert_eq!(report.rows_rejected, 7);
        assert_eq!(report.batches_spilled, 0);
    }

    #[test]
    fn test_spill_failure_aborts_after_disposed_prefix() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let (sink, seen) = ScriptedSink::new(vec![
            SendOutcome::Delivered { rows: 2 },
            SendOutcome::TransportFailed {
                error: "timeout".to_string(),
            },
        ]);
        let abort = upload(sink, SpillWriter::new(blocker.join("spill"), "r"), sample_rows(6), 2)
            .unwrap_err();

        assert_eq!(abort.rows_disposed, 2);
        assert_eq!(abort.report.rows_delivered, 2);
        assert_eq!(seen.lock().len(), 2);
        assert!(abort.reason.contains("Spill error"));
    }

    /// Delivers batches until the given one, then panics.
    struct PanickingSink {
        panic_at: usize,
        sent: usize,
    }

    impl RowSink for PanickingSink {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn send(&mut self, batch: &[OutputRow]) -> SendOutcome {
            if self.sent == self.panic_at {
                panic!("sink blew up");
            }
            self.sent += 1;
            SendOutcome::Delivered { rows: batch.len() }
        }
    }

    #[test]
    fn test_worker_panic_reports_disposed_rows() {
        let tmp = TempDir::new().unwrap();
        let sink = PanickingSink {
            panic_at: 2,
            sent: 0,
        };
        let rows = sample_rows(9);

        let uploader = Uploader::spawn(sink, SpillWriter::new(tmp.path(), "r"), 1).unwrap();
        for batch in take_batches(&rows, 2) {
            if uploader.send(batch).is_err() {
                break;
            }
        }
        let abort = uploader.finish().unwrap_err();

        assert_eq!(abort.reason, "upload worker panicked");
        assert_eq!(abort.rows_disposed, 4);
    }

    #[test]
    fn test_finish_with_no_batches() {
        let tmp = TempDir::new().unwrap();
        let (sink, _) = ScriptedSink::new(Vec::new());
        let uploader = Uploader::spawn(sink, SpillWriter::new(tmp.path(), "r"), 1).unwrap();

        assert_eq!(uploader.finish().unwrap(), UploadReport::default());
    }
}
