//! Progress reporting and cooperative cancellation.
//!
//! The pipeline pushes one [`ProgressEvent`] per resolved batch to an
//! optional callback and publishes the same event on a watch channel, so
//! callers can either react to events or poll [`StatusHandle::snapshot`].

use crate::models::AggregateResult;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// How a batch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Succeeded => write!(f, "succeeded"),
            BatchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Emitted after each batch resolves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub batch_ordinal: usize,
    pub batches_total: usize,
    pub percent_complete: f64,
    /// Scored items accumulated so far.
    pub items_processed: usize,
    pub status: BatchStatus,
    /// Aggregate over every batch finished so far.
    ///
    /// Rebuilt from all accumulated items on each event, so a run spends
    /// O(batches x items) on progress. Fine at forum-thread scale.
    pub partial: AggregateResult,
}

impl ProgressEvent {
    /// Percentage of planned batches resolved, one decimal place.
    pub fn percent(ordinal: usize, total: usize) -> f64 {
        if total == 0 {
            return 100.0;
        }
        (1000.0 * ordinal as f64 / total as f64).round() / 10.0
    }
}

/// Callback invoked with every progress event.
pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Fans progress events out to a callback and a watch channel.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    sender: watch::Sender<Option<ProgressEvent>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    /// Reporter without a callback; events are only published to handles.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            callback: None,
            sender,
        }
    }

    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::new()
        }
    }

    /// Pull-based accessor for the latest event.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn report(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(&event);
        }
        self.sender.send_replace(Some(event));
    }
}

/// Read side of the progress channel.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    receiver: watch::Receiver<Option<ProgressEvent>>,
}

impl StatusHandle {
    /// The most recent event, if any batch has resolved yet.
    pub fn snapshot(&self) -> Option<ProgressEvent> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next event. Returns `false` once the reporter is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

/// Cooperative stop flag, checked before each batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationGate {
    cancelled: Arc<AtomicBool>,
}

impl CancellationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(ordinal: usize, total: usize) -> ProgressEvent {
        ProgressEvent {
            batch_ordinal: ordinal,
            batches_total: total,
            percent_complete: ProgressEvent::percent(ordinal, total),
            items_processed: ordinal * 10,
            status: BatchStatus::Succeeded,
            partial: AggregateResult::default(),
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(ProgressEvent::percent(1, 3), 33.3);
        assert_eq!(ProgressEvent::percent(3, 3), 100.0);
        assert_eq!(ProgressEvent::percent(0, 0), 100.0);
    }

    #[test]
    fn test_callback_and_snapshot() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let reporter = ProgressReporter::with_callback(move |e| {
            counter.store(e.batch_ordinal, Ordering::SeqCst);
        });
        let handle = reporter.status_handle();
        assert!(handle.snapshot().is_none());

        reporter.report(event(1, 4));
        reporter.report(event(2, 4));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let latest = handle.snapshot().unwrap();
        assert_eq!(latest.batch_ordinal, 2);
        assert_eq!(latest.percent_complete, 50.0);
    }

    #[test]
    fn test_report_without_subscribers() {
        let reporter = ProgressReporter::new();
        reporter.report(event(1, 1));
        assert_eq!(reporter.status_handle().snapshot().unwrap().batch_ordinal, 1);
    }

    #[tokio::test]
    async fn test_handle_waits_for_change() {
        let reporter = ProgressReporter::new();
        let mut handle = reporter.status_handle();

        reporter.report(event(1, 2));
        assert!(handle.changed().await);
        assert_eq!(handle.snapshot().unwrap().batch_ordinal, 1);

        drop(reporter);
        assert!(!handle.changed().await);
    }

    #[test]
    fn test_cancellation_gate_shared_between_clones() {
        let gate = CancellationGate::new();
        let clone = gate.clone();
        assert!(!gate.is_cancelled());

        clone.cancel();
        assert!(gate.is_cancelled());
    }
}
