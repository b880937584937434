//! Delivery worker pool.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::registry::Snapshot;
use crate::agent::transport::{MetricSender, TransportError};
use crate::retry::{RetryError, Retrier};

/// Fixed set of tasks draining the snapshot queue.
///
/// Workers share one receiver; each takes a snapshot, delivers it through the
/// retrier and moves on. A snapshot whose retries are exhausted is logged and
/// dropped. No ordering holds between snapshots handled by different workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `workers` tasks (at least one). Must be called inside a Tokio runtime.
    pub fn spawn(
        workers: usize,
        queue: mpsc::Receiver<Snapshot>,
        sender: Arc<dyn MetricSender>,
        retrier: Retrier,
        cancel: CancellationToken,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: Arc::clone(&queue),
                    sender: Arc::clone(&sender),
                    retrier: retrier.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Delivery worker panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Snapshot>>>,
    sender: Arc<dyn MetricSender>,
    retrier: Retrier,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let worker_id = self.id;
        tracing::debug!(worker_id, "Delivery worker started");

        loop {
            let next = {
                let mut queue = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    queue = self.queue.lock() => queue,
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    next = queue.recv() => next,
                }
            };

            let Some(snapshot) = next else {
                break;
            };
            self.deliver(snapshot).await;
        }

        tracing::debug!(worker_id, "Delivery worker stopped");
    }

    async fn deliver(&self, snapshot: Snapshot) {
        let worker_id = self.id;
        let count = snapshot.len();
        let records = snapshot.records();

        let result = self
            .retrier
            .run_if(
                &self.cancel,
                || self.sender.send(records),
                TransportError::is_recoverable,
            )
            .await;

        let age_ms = snapshot.age_ms();
        match result {
            Ok(()) => tracing::debug!(worker_id, count, age_ms, "Snapshot delivered"),
            Err(RetryError::Cancelled) => {
                tracing::info!(worker_id, count, age_ms, "Delivery abandoned on shutdown");
            }
            Err(e) => {
                tracing::error!(worker_id, count, age_ms, error = %e, "Snapshot dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricRecord;
    use crate::retry::Backoff;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Records delivered batches; fails the first `failures` calls.
    struct RecordingSender {
        delivered: std::sync::Mutex<Vec<Vec<MetricRecord>>>,
        calls: AtomicU32,
        failures: u32,
        status_error: bool,
    }

    impl RecordingSender {
        fn new(failures: u32) -> Self {
            Self {
                delivered: std::sync::Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
                failures,
                status_error: false,
            }
        }
    }

    #[async_trait]
    impl MetricSender for RecordingSender {
        async fn send(&self, records: &[MetricRecord]) -> Result<(), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.status_error {
                    return Err(TransportError::Status {
                        status: 500,
                        body: "down".into(),
                    });
                }
                // A request to a closed port yields a connect error.
                let err = reqwest::Client::new()
                    .post("http://127.0.0.1:1/updates")
                    .send()
                    .await
                    .unwrap_err();
                return Err(TransportError::Request(err));
            }
            self.delivered.lock().unwrap().push(records.to_vec());
            Ok(())
        }
    }

    fn snapshot_of(registry_value: i64) -> Snapshot {
        let registry = crate::agent::MetricRegistry::new();
        let mut guard = registry.try_lock().unwrap();
        guard.inc_counter("PollCount", registry_value).unwrap();
        guard.snapshot_and_reset()
    }

    fn fast_retrier(max_attempts: u32) -> Retrier {
        Retrier::new(Backoff::new(
            max_attempts,
            Duration::from_millis(1),
            1.0,
            Duration::from_millis(1),
        ))
    }

    #[tokio::test]
    async fn test_pool_delivers_every_snapshot() {
        let (tx, rx) = mpsc::channel(3);
        let sender = Arc::new(RecordingSender::new(0));
        let pool = WorkerPool::spawn(
            3,
            rx,
            sender.clone(),
            fast_retrier(3),
            CancellationToken::new(),
        );
        assert_eq!(pool.len(), 3);

        for i in 1..=5 {
            tx.send(snapshot_of(i)).await.unwrap();
        }
        drop(tx);
        pool.join().await;

        let delivered = sender.delivered.lock().unwrap();
        let mut deltas: Vec<i64> = delivered
            .iter()
            .map(|batch| batch[0].delta.unwrap())
            .collect();
        deltas.sort();
        assert_eq!(deltas, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let (tx, rx) = mpsc::channel(1);
        let sender = Arc::new(RecordingSender::new(2));
        let pool = WorkerPool::spawn(1, rx, sender.clone(), fast_retrier(3), CancellationToken::new());

        tx.send(snapshot_of(7)).await.unwrap();
        drop(tx);
        pool.join().await;

        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sender.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_snapshot_is_dropped() {
        let (tx, rx) = mpsc::channel(2);
        let sender = Arc::new(RecordingSender::new(3));
        let pool = WorkerPool::spawn(1, rx, sender.clone(), fast_retrier(3), CancellationToken::new());

        tx.send(snapshot_of(1)).await.unwrap();
        tx.send(snapshot_of(2)).await.unwrap();
        drop(tx);
        pool.join().await;

        // Three failed attempts for the first snapshot, one success for the second.
        assert_eq!(sender.calls.load(Ordering::SeqCst), 4);
        let delivered = sender.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0][0].delta, Some(2));
    }

    #[tokio::test]
    async fn test_status_error_not_retried() {
        let (tx, rx) = mpsc::channel(1);
        let mut sender = RecordingSender::new(1);
        sender.status_error = true;
        let sender = Arc::new(sender);
        let pool = WorkerPool::spawn(1, rx, sender.clone(), fast_retrier(5), CancellationToken::new());

        tx.send(snapshot_of(1)).await.unwrap();
        drop(tx);
        pool.join().await;

        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert!(sender.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_workers() {
        let (_tx, rx) = mpsc::channel::<Snapshot>(1);
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(
            2,
            rx,
            Arc::new(RecordingSender::new(0)),
            fast_retrier(1),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .unwrap();
    }
}
