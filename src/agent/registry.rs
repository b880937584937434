//! Shared metric registry.
//!
//! One [`MetricRegistry`] is owned by the agent and handed (by `Arc`) to every
//! collector and to the dispatcher. All access goes through a single async
//! mutex; a [`RegistryGuard`] is the only way to read or mutate the map.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::model::{Counter, Gauge, Metric, MetricRecord, ModelError};

/// Process-local map of metric name to current value.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    inner: Arc<Mutex<BTreeMap<String, Metric>>>,
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("len", &self.inner.try_lock().map(|m| m.len()).ok())
            .finish_non_exhaustive()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            metrics: self.inner.lock().await,
        }
    }

    /// Wait at most `wait` for exclusive access.
    ///
    /// Returns `None` when the lock is still held after `wait`; collectors use
    /// this to skip a cycle instead of queueing behind a slow holder.
    pub async fn lock_timeout(&self, wait: Duration) -> Option<RegistryGuard<'_>> {
        tokio::time::timeout(wait, self.lock()).await.ok()
    }

    /// Try to get exclusive access without waiting.
    pub fn try_lock(&self) -> Option<RegistryGuard<'_>> {
        self.inner
            .try_lock()
            .ok()
            .map(|metrics| RegistryGuard { metrics })
    }
}

/// Exclusive access to the registry for one poll or snapshot cycle.
pub struct RegistryGuard<'a> {
    metrics: MutexGuard<'a, BTreeMap<String, Metric>>,
}

impl std::fmt::Debug for RegistryGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryGuard")
            .field("len", &self.metrics.len())
            .finish()
    }
}

impl RegistryGuard<'_> {
    /// Overwrite (or create) a gauge. NaN and infinite samples are dropped.
    pub fn set_gauge(&mut self, name: &str, value: f64) {
        if !value.is_finite() {
            tracing::warn!(metric = name, value, "Skipping non-finite gauge sample");
            return;
        }
        match self.metrics.get_mut(name) {
            Some(Metric::Gauge(g)) => g.set(value),
            _ => {
                self.metrics
                    .insert(name.to_owned(), Metric::Gauge(Gauge::new(name, value)));
            }
        }
    }

    /// Add `delta` to a counter, creating it at zero first if needed.
    ///
    /// # Errors
    /// [`ModelError::NegativeDelta`] when `delta < 0`; the stored value is left
    /// unchanged.
    pub fn inc_counter(&mut self, name: &str, delta: i64) -> Result<(), ModelError> {
        if let Some(Metric::Counter(c)) = self.metrics.get_mut(name) {
            return c.increment(delta);
        }
        let mut counter = Counter::new(name, 0);
        counter.increment(delta)?;
        self.metrics.insert(name.to_owned(), Metric::Counter(counter));
        Ok(())
    }

    /// Apply a wire record: gauge overwrite or counter increment.
    pub fn update(&mut self, record: &MetricRecord) -> Result<(), ModelError> {
        match record.validate()? {
            Metric::Gauge(g) => self.set_gauge(&g.name, g.value),
            Metric::Counter(c) => self.inc_counter(&c.name, c.value)?,
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Copy every metric into a [`Snapshot`] and zero all counters.
    ///
    /// Counters are reset here rather than after a confirmed delivery, so a
    /// snapshot that is later dropped loses its counter deltas.
    pub fn snapshot_and_reset(&mut self) -> Snapshot {
        let records = self
            .metrics
            .values_mut()
            .map(|metric| {
                let record = metric.to_record();
                if let Metric::Counter(c) = metric {
                    c.reset();
                }
                record
            })
            .collect();

        Snapshot {
            records,
            taken_at: Utc::now(),
        }
    }
}

/// Immutable point-in-time copy of the registry; the unit of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    records: Vec<MetricRecord>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Milliseconds since the snapshot was taken.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.taken_at).num_milliseconds()
    }
}
