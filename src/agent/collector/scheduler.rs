//! Collector scheduler: one interval task per collector.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::agent::collector::{Collector, CollectorError};
use crate::agent::registry::MetricRegistry;

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a spawned collector task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// Position in spawn order.
    pub id: usize,
    /// Collector name.
    pub name: String,
    /// Tick interval.
    pub interval: Duration,
}

/// Runs every registered collector on its own timer against one registry.
///
/// A cycle that cannot get the registry lock within one interval is skipped,
/// so a slow holder never builds a backlog of pending polls.
pub struct CollectorScheduler {
    registry: MetricRegistry,
    cancel: CancellationToken,
    jobs: Vec<JobInfo>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CollectorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorScheduler")
            .field("job_count", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl CollectorScheduler {
    /// Create a scheduler; tasks stop when `cancel` fires.
    pub fn new(registry: MetricRegistry, cancel: CancellationToken) -> Self {
        Self {
            registry,
            cancel,
            jobs: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn a collector task. Must be called inside a Tokio runtime.
    pub fn spawn<C: Collector>(&mut self, collector: C) -> JobInfo {
        let info = JobInfo {
            id: self.jobs.len(),
            name: collector.name().to_owned(),
            interval: collector.interval(),
        };

        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        self.handles
            .push(tokio::spawn(run_loop(collector, registry, cancel)));
        self.jobs.push(info.clone());

        tracing::info!(collector = %info.name, interval = ?info.interval, "Collector registered");
        info
    }

    /// List all spawned jobs.
    pub fn list_jobs(&self) -> &[JobInfo] {
        &self.jobs
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Cancel all collectors and wait with the default timeout.
    pub async fn shutdown(self) -> Result<(), CollectorError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Cancel all collectors and wait for their tasks to finish.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<(), CollectorError> {
        self.cancel.cancel();
        let job_count = self.jobs.len();

        let joined = tokio::time::timeout(timeout, async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Collector task panicked");
                }
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!(job_count, "Collector scheduler shutdown timed out");
            return Err(CollectorError::ShutdownTimeout(timeout));
        }
        tracing::info!(job_count, "Collector scheduler shutdown complete");
        Ok(())
    }
}

async fn run_loop<C: Collector>(
    mut collector: C,
    registry: MetricRegistry,
    cancel: CancellationToken,
) {
    let interval = collector.interval();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = run_collection(&mut collector, &registry, interval) => {}
        }
    }

    tracing::debug!(collector = %collector.name(), "Collector stopped");
}

/// Execute a single collection cycle.
async fn run_collection<C: Collector>(
    collector: &mut C,
    registry: &MetricRegistry,
    interval: Duration,
) {
    let Some(mut guard) = registry.lock_timeout(interval).await else {
        tracing::debug!(collector = %collector.name(), "Registry busy, skipping cycle");
        return;
    };

    let start = std::time::Instant::now();
    match collector.collect(&mut guard) {
        Ok(()) => {
            tracing::debug!(
                collector = %collector.name(),
                duration_us = start.elapsed().as_micros() as u64,
                "Collection succeeded"
            );
        }
        Err(e) => {
            tracing::warn!(collector = %collector.name(), error = %e, "Collection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::registry::RegistryGuard;
    use crate::model::Metric;

    struct CountingCollector {
        name: String,
        interval: Duration,
        fail: bool,
    }

    impl CountingCollector {
        fn new(name: &str, interval: Duration) -> Self {
            Self {
                name: name.to_owned(),
                interval,
                fail: false,
            }
        }
    }

    impl Collector for CountingCollector {
        fn name(&self) -> &str {
            &self.name
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        fn collect(&mut self, metrics: &mut RegistryGuard<'_>) -> Result<(), CollectorError> {
            metrics.inc_counter(&self.name, 1)?;
            if self.fail {
                return Err(CollectorError::Source("boom".into()));
            }
            Ok(())
        }
    }

    fn counter_value(guard: &RegistryGuard<'_>, name: &str) -> i64 {
        match guard.get(name) {
            Some(Metric::Counter(c)) => c.value,
            _ => 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_lifecycle() {
        let registry = MetricRegistry::new();
        let mut scheduler = CollectorScheduler::new(registry.clone(), CancellationToken::new());

        scheduler.spawn(CountingCollector::new("fast", Duration::from_millis(100)));
        let mut failing = CountingCollector::new("failing", Duration::from_millis(250));
        failing.fail = true;
        scheduler.spawn(failing);

        assert_eq!(scheduler.job_count(), 2);
        assert_eq!(scheduler.list_jobs()[0].name, "fast");
        assert_eq!(scheduler.list_jobs()[1].interval, Duration::from_millis(250));

        // Ticks at 0, 100, ..., 500 ms for "fast"; 0, 250, 500 ms for "failing".
        tokio::time::sleep(Duration::from_millis(550)).await;

        {
            let guard = registry.lock().await;
            assert_eq!(counter_value(&guard, "fast"), 6);
            assert_eq!(counter_value(&guard, "failing"), 3);
        }

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_registry_skips_cycles() {
        let registry = MetricRegistry::new();
        let mut scheduler = CollectorScheduler::new(registry.clone(), CancellationToken::new());

        let held = registry.lock().await;
        scheduler.spawn(CountingCollector::new("blocked", Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(held.get("blocked").is_none());
        drop(held);

        // Resumes after release without replaying the ten skipped ticks.
        tokio::time::sleep(Duration::from_millis(250)).await;
        {
            let guard = registry.lock().await;
            let value = counter_value(&guard, "blocked");
            assert!((1..=3).contains(&value), "value = {value}");
        }

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_collectors() {
        let registry = MetricRegistry::new();
        let cancel = CancellationToken::new();
        let mut scheduler = CollectorScheduler::new(registry.clone(), cancel.clone());
        scheduler.spawn(CountingCollector::new("c", Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let value = counter_value(&registry.lock().await, "c");
        assert_eq!(value, 2);
        scheduler.shutdown().await.unwrap();
    }
}
