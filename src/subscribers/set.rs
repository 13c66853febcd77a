//! # Observer fan-out.
//!
//! The master publishes lifecycle events from the middle of its
//! supervision loop — between a reap and a fork, sometimes mid-rotation.
//! None of that may ever wait on an observer: a wedged status pipe or a
//! slow log sink must not delay signalling a listener or reaping a dead
//! one. [`SubscriberSet`] therefore gives every observer its own bounded
//! queue and worker task, and the loop hands events over with a
//! non-blocking send.
//!
//! ## Delivery policy
//! - An observer that falls behind loses events: the send is dropped and
//!   tallied, and the first loss is logged. Lifecycle reports are
//!   advisory; master state never depends on an observer having seen one.
//! - An observer that panics is detached: its worker exits and later
//!   events to it are discarded, the same way a failing status pipe is
//!   logged once and then muted.
//! - Per-observer FIFO order is kept; there is no ordering across
//!   observers.
//!
//! ```text
//!    emit(&Event)
//!        │                    (Arc-clone per observer)
//!        ├────────► [queue: log]    ─► worker ─► LogWriter::on_event
//!        ├────────► [queue: status] ─► worker ─► StatusPipe::on_event
//!        └────────► [queue: …]      ─► worker ─► embedder observers
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::Event;

use super::Subscribe;

/// One observer's queue plus its loss accounting.
struct Lane {
    name: &'static str,
    queue: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

impl Lane {
    fn record_loss(&self, reason: &'static str) {
        // Log the first loss; keep counting the rest for shutdown.
        if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
            tracing::warn!(
                observer = self.name,
                reason,
                "observer is losing lifecycle events"
            );
        }
    }
}

/// Fan-out from the supervision loop to its observers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Spawns one worker per observer. Must be called within the runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
            lanes.push(Lane {
                name: sub.name(),
                queue: tx,
                dropped: AtomicU64::new(0),
            });
            workers.push(tokio::spawn(Self::drive(sub, rx)));
        }

        Self { lanes, workers }
    }

    /// Delivers queued events to one observer until its queue closes or
    /// it panics.
    async fn drive(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>) {
        while let Some(ev) = rx.recv().await {
            let handled = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()))
                .catch_unwind()
                .await;
            if let Err(panic) = handled {
                // Detach rather than retry: an observer that panicked on
                // one lifecycle event would likely panic on the next.
                tracing::error!(
                    observer = sub.name(),
                    panic = ?panic,
                    "observer panicked; detaching it"
                );
                return;
            }
        }
    }

    /// Hands one event to every observer without waiting on any of them.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for lane in &self.lanes {
            match lane.queue.try_send(Arc::clone(&ev)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => lane.record_loss("queue full"),
                Err(mpsc::error::TrySendError::Closed(_)) => lane.record_loss("detached"),
            }
        }
    }

    /// Closes every queue, waits for observers to drain what they already
    /// accepted, and reports any losses.
    pub async fn shutdown(self) {
        let Self { lanes, workers } = self;
        let tallies: Vec<(&'static str, u64)> = lanes
            .iter()
            .map(|lane| (lane.name, lane.dropped.load(Ordering::Relaxed)))
            .collect();
        drop(lanes);
        for worker in workers {
            let _ = worker.await;
        }
        for (observer, dropped) in tallies {
            if dropped > 0 {
                tracing::warn!(observer, dropped, "lifecycle events were lost");
            }
        }
    }
}
