//! Periodic snapshot dispatch into the bounded delivery queue.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::agent::registry::{MetricRegistry, Snapshot};

/// Snapshots the registry on every tick and feeds the worker queue.
///
/// The queue is bounded; when every slot is taken the dispatcher waits for a
/// worker to free one, which throttles snapshotting under delivery failure.
#[derive(Debug)]
pub struct Dispatcher {
    registry: MetricRegistry,
    interval: Duration,
    queue: mpsc::Sender<Snapshot>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: MetricRegistry,
        interval: Duration,
        queue: mpsc::Sender<Snapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval,
            queue,
            cancel,
        }
    }

    /// Run until cancelled or until every worker is gone.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.dispatch_once().await {
                tracing::warn!("Delivery queue closed, dispatcher stopping");
                break;
            }
        }
        tracing::debug!("Dispatcher stopped");
    }

    /// Take one snapshot and enqueue it.
    ///
    /// Returns `false` when the queue is closed. Cancellation while waiting
    /// for a free slot drops the snapshot and returns `true`.
    pub async fn dispatch_once(&self) -> bool {
        let snapshot = {
            let mut guard = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return true,
                guard = self.registry.lock() => guard,
            };
            guard.snapshot_and_reset()
        };

        if snapshot.is_empty() {
            tracing::debug!("Registry empty, nothing to dispatch");
            return true;
        }

        let count = snapshot.len();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            sent = self.queue.send(snapshot) => match sent {
                Ok(()) => {
                    tracing::debug!(count, "Snapshot dispatched");
                    true
                }
                Err(_) => false,
            },
        }
    }
}
