//! Batch orchestration
//!
//! Runs every item of a batch through [`normalize`] strictly one after the
//! other, records a failure for an item without stopping the batch, and
//! publishes progress between items.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::EngineHandle;
use crate::error::{EqualizerError, ItemFailure, Result};
use crate::normalize::normalize;

/// One uploaded audio file
#[derive(Debug, Clone, PartialEq)]
pub struct AudioItem {
    pub name: String,
    pub data: Bytes,
    /// Declared media type, e.g. `audio/mpeg`
    pub media_type: String,
}

impl AudioItem {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            media_type: media_type.into(),
        }
    }
}

/// Result of processing one item
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Processed { name: String, bytes: Bytes },
    Failed { name: String, reason: String },
}

impl ProcessingOutcome {
    pub fn name(&self) -> &str {
        match self {
            ProcessingOutcome::Processed { name, .. } | ProcessingOutcome::Failed { name, .. } => {
                name
            }
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, ProcessingOutcome::Processed { .. })
    }
}

/// Items attempted so far out of the batch total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    /// Completion as a whole percentage, 0 for an empty batch
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Receives progress after every completed item
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: BatchProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(BatchProgress) + Send + Sync,
{
    fn on_progress(&self, progress: BatchProgress) {
        self(progress)
    }
}

impl ProgressObserver for tokio::sync::mpsc::UnboundedSender<BatchProgress> {
    fn on_progress(&self, progress: BatchProgress) {
        // A dropped receiver only means nobody is watching any more
        let _ = self.send(progress);
    }
}

/// Observer that ignores progress
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: BatchProgress) {}
}

/// Cooperative cancellation flag, honoured between items
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Guard that cancels this signal when dropped
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Cancels its signal when dropped, e.g. with an abandoned request future
#[derive(Debug)]
pub struct CancelOnDrop(CancelSignal);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Outcomes of a batch, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<ProcessingOutcome>,
    /// True when the batch stopped early on cancellation
    pub cancelled: bool,
    pub progress: BatchProgress,
}

impl BatchReport {
    pub fn processed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_processed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.processed_count()
    }

    pub fn failures(&self) -> Vec<ItemFailure> {
        collect_failures(&self.outcomes)
    }
}

fn collect_failures(outcomes: &[ProcessingOutcome]) -> Vec<ItemFailure> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            ProcessingOutcome::Failed { name, reason } => Some(ItemFailure {
                name: name.clone(),
                reason: reason.clone(),
            }),
            ProcessingOutcome::Processed { .. } => None,
        })
        .collect()
}

/// Normalize every item of a batch.
///
/// Returns one outcome per attempted item, in input order. A batch that runs
/// to completion without a single success is a `TotalFailure`. A cancelled
/// batch returns what it has with `cancelled` set.
pub async fn process_batch(
    handle: &EngineHandle,
    items: &[AudioItem],
    observer: &dyn ProgressObserver,
    cancel: &CancelSignal,
) -> Result<BatchReport> {
    if items.is_empty() {
        return Err(EqualizerError::EmptyBatch);
    }

    let batch_id = Uuid::new_v4();

    let engine = handle.acquire().await?;

    let mut progress = BatchProgress::new(items.len());
    let mut outcomes = Vec::with_capacity(items.len());
    let mut cancelled = false;

    tracing::info!(batch = %batch_id, items = items.len(), "Batch started");

    for item in items {
        if cancel.is_cancelled() {
            tracing::info!(
                batch = %batch_id,
                completed = progress.completed,
                total = progress.total,
                "Batch cancelled"
            );
            cancelled = true;
            break;
        }

        let outcome = match normalize(&engine, item).await {
            Ok(bytes) => {
                tracing::info!(batch = %batch_id, name = %item.name, bytes = bytes.len(), "Item processed");
                ProcessingOutcome::Processed {
                    name: item.name.clone(),
                    bytes,
                }
            }
            Err(e) => {
                tracing::warn!(batch = %batch_id, name = %item.name, error = %e.kind, "Item failed");
                ProcessingOutcome::Failed {
                    name: item.name.clone(),
                    reason: e.kind.to_string(),
                }
            }
        };
        outcomes.push(outcome);

        progress.completed += 1;
        observer.on_progress(progress);
    }

    let report = BatchReport {
        outcomes,
        cancelled,
        progress,
    };

    tracing::info!(
        batch = %batch_id,
        processed = report.processed_count(),
        failed = report.failed_count(),
        cancelled,
        "Batch finished"
    );

    if !cancelled && report.processed_count() == 0 {
        return Err(EqualizerError::TotalFailure {
            failures: report.failures(),
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let mut progress = BatchProgress::new(3);
        assert_eq!(progress.percent(), 0);
        progress.completed = 1;
        assert_eq!(progress.percent(), 33);
        progress.completed = 3;
        assert_eq!(progress.percent(), 100);
        assert!(progress.is_complete());
        assert_eq!(BatchProgress::default().percent(), 0);
    }

    #[test]
    fn test_cancel_signal_shared_between_clones() {
        let signal = CancelSignal::new();
        let other = signal.clone();
        assert!(!other.is_cancelled());
        signal.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_cancel_on_drop() {
        let signal = CancelSignal::new();
        let guard = signal.cancel_on_drop();
        assert!(!signal.is_cancelled());
        drop(guard);
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_report_counts_and_failures() {
        let report = BatchReport {
            outcomes: vec![
                ProcessingOutcome::Processed {
                    name: "a.mp3".into(),
                    bytes: Bytes::from_static(b"x"),
                },
                ProcessingOutcome::Failed {
                    name: "b.mp3".into(),
                    reason: "bad".into(),
                },
            ],
            cancelled: false,
            progress: BatchProgress {
                completed: 2,
                total: 2,
            },
        };
        assert_eq!(report.processed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.failures(),
            vec![ItemFailure {
                name: "b.mp3".into(),
                reason: "bad".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_channel_observer_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.on_progress(BatchProgress {
            completed: 1,
            total: 2,
        });
        assert_eq!(rx.recv().await.unwrap().completed, 1);
    }
}
