//! Caller-side handle for a running batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::types::{BatchEvent, LookupResult, Progress};

/// Cooperative cancellation flag shared by a batch's workers.
///
/// Stopping is idempotent and has no effect once the batch has finished.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Sleep for `duration`, waking early if stopped.
    ///
    /// Returns `true` when the signal is (or becomes) stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = rx.changed() => changed.is_ok() && *rx.borrow(),
        }
    }
}

/// Everything a batch emitted, gathered by [`BatchHandle::collect`].
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Progress events in emission order.
    pub progress: Vec<Progress>,
    /// Result events in emission (completion) order.
    pub results: Vec<LookupResult>,
    /// The final aggregate, absent when the batch was stopped.
    pub finished: Option<Vec<LookupResult>>,
}

impl BatchReport {
    pub fn was_stopped(&self) -> bool {
        self.finished.is_none()
    }
}

/// Receiving end of a batch started by [`super::BatchCoordinator::run`].
pub struct BatchHandle {
    events: mpsc::UnboundedReceiver<BatchEvent>,
    stop: StopSignal,
    total: usize,
}

impl BatchHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<BatchEvent>,
        stop: StopSignal,
        total: usize,
    ) -> Self {
        Self {
            events,
            stop,
            total,
        }
    }

    /// Next event, or `None` once every worker has exited.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Stop dispatching. In-flight requests still report their results.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A clonable stop flag, e.g. for a Ctrl-C handler.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Number of requests submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Drain the event stream to its end.
    pub async fn collect(mut self) -> BatchReport {
        let mut report = BatchReport::default();
        while let Some(event) = self.next_event().await {
            match event {
                BatchEvent::Progress(progress) => report.progress.push(progress),
                BatchEvent::Result(result) => report.results.push(result),
                BatchEvent::Finished(results) => report.finished = Some(results),
            }
        }
        report
    }
}
