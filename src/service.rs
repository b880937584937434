//! Metric service.
//!
//! Thin layer between request handlers and a [`MetricStore`]: single-record
//! updates accumulate counters here, batches go straight to the store.

use serde::Serialize;
use thiserror::Error;

use crate::model::{Counter, Gauge, Metric, MetricKind, MetricRecord, ModelError};
use crate::storage::{MetricStore, StorageError};

/// Service-level failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid metric: {0}")]
    Invalid(#[from] ModelError),
}

/// One row of [`MetricService::list_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Value formatted for display (shortest round-trip form for gauges).
    pub value: String,
}

/// Operations request handlers call into.
#[derive(Debug)]
pub struct MetricService<S> {
    store: S,
}

impl<S: MetricStore> MetricService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// All gauges, then all counters.
    pub async fn list_metrics(&self) -> Result<Vec<MetricSummary>, ServiceError> {
        let gauges = self.store.list_gauge().await?;
        let counters = self.store.list_counter().await?;

        let mut result = Vec::with_capacity(gauges.len() + counters.len());
        result.extend(gauges.iter().map(MetricSummary::from));
        result.extend(counters.iter().map(MetricSummary::from));
        Ok(result)
    }

    /// Current value of one metric as a record, or `None` if unknown.
    pub async fn get_metric(
        &self,
        kind: MetricKind,
        name: &str,
    ) -> Result<Option<MetricRecord>, ServiceError> {
        let record = match kind {
            MetricKind::Gauge => self.store.get_gauge(name).await?.as_ref().map(MetricRecord::from),
            MetricKind::Counter => self
                .store
                .get_counter(name)
                .await?
                .as_ref()
                .map(MetricRecord::from),
        };
        Ok(record)
    }

    /// Apply one record: gauges overwrite, counters add to the stored total.
    ///
    /// Returns the stored state, with a counter's total in `delta`. The
    /// read-modify-write is not atomic across concurrent callers.
    pub async fn update_metric(&self, record: &MetricRecord) -> Result<MetricRecord, ServiceError> {
        match record.validate()? {
            Metric::Gauge(g) => {
                let result = MetricRecord::from(&g);
                self.store.set_gauge(g).await?;
                Ok(result)
            }
            Metric::Counter(delta) => {
                let mut counter = self
                    .store
                    .get_counter(&delta.name)
                    .await?
                    .unwrap_or_else(|| Counter::new(&delta.name, 0));
                counter.increment(delta.value)?;
                let result = MetricRecord::from(&counter);
                self.store.set_counter(counter).await?;
                Ok(result)
            }
        }
    }

    /// Apply a batch through the store's own upsert.
    pub async fn update_metrics(
        &self,
        records: &[MetricRecord],
    ) -> Result<Vec<MetricRecord>, ServiceError> {
        Ok(self.store.batch_upsert_metrics(records).await?)
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.store.ping().await?)
    }
}

impl From<&Gauge> for MetricSummary {
    fn from(g: &Gauge) -> Self {
        Self {
            name: g.name.clone(),
            kind: MetricKind::Gauge,
            value: g.value.to_string(),
        }
    }
}

impl From<&Counter> for MetricSummary {
    fn from(c: &Counter) -> Self {
        Self {
            name: c.name.clone(),
            kind: MetricKind::Counter,
            value: c.value.to_string(),
        }
    }
}
