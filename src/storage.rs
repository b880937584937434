//! Storage Layer
//!
//! Receiver-side metric persistence behind one interface with two backends:
//! - **Memory**: lock-protected maps, optionally dumped to a JSON file either
//!   periodically or on every write
//! - **Database**: SQLite tables upserted inside a single transaction per batch
//!
//! # Components
//!
//! - [`MetricStore`]: the contract both backends implement
//! - [`MemoryStore`] / [`DatabaseStore`]: the two backends
//! - [`Storage`]: the backend chosen at startup
//! - [`StorageBuilder`]: selects and opens a backend from [`StorageConfig`]
//!
//! # Batch atomicity
//!
//! [`MetricStore::batch_upsert_metrics`] is atomic only for the database
//! backend. The memory backend applies records in order and stops at the first
//! invalid one, keeping what it already applied.
//!
//! [`StorageConfig`]: crate::config::StorageConfig

use async_trait::async_trait;

use crate::model::{Counter, Gauge, MetricRecord};

mod builder;
mod database;
pub mod db;
mod error;
mod memory;
pub mod schema;

pub use builder::StorageBuilder;
pub use database::DatabaseStore;
pub use error::StorageError;
pub use memory::MemoryStore;

/// Uniform access to stored gauges and counters.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// The gauge named `name`, or `None` if it was never stored.
    async fn get_gauge(&self, name: &str) -> Result<Option<Gauge>, StorageError>;

    /// Store `gauge`, replacing any previous value.
    async fn set_gauge(&self, gauge: Gauge) -> Result<(), StorageError>;

    async fn list_gauge(&self) -> Result<Vec<Gauge>, StorageError>;

    /// The counter named `name`, or `None` if it was never stored.
    async fn get_counter(&self, name: &str) -> Result<Option<Counter>, StorageError>;

    /// Store `counter` as given. Accumulation is the caller's job.
    async fn set_counter(&self, counter: Counter) -> Result<(), StorageError>;

    async fn list_counter(&self) -> Result<Vec<Counter>, StorageError>;

    /// Apply records in order: gauges overwrite, counters add their delta.
    ///
    /// Returns one record per input, carrying the gauge value or the counter's
    /// new running total in `delta`.
    async fn batch_upsert_metrics(
        &self,
        records: &[MetricRecord],
    ) -> Result<Vec<MetricRecord>, StorageError>;

    /// Liveness probe of the backing resource.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Release resources. Calling it more than once is harmless.
    async fn close(&self) -> Result<(), StorageError>;
}

/// The backend selected at startup.
#[derive(Debug)]
pub enum Storage {
    Memory(MemoryStore),
    Database(DatabaseStore),
}

impl Storage {
    /// Backend name for logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Database(_) => "database",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Storage::Memory($store) => $call,
            Storage::Database($store) => $call,
        }
    };
}

#[async_trait]
impl MetricStore for Storage {
    async fn get_gauge(&self, name: &str) -> Result<Option<Gauge>, StorageError> {
        delegate!(self, s => s.get_gauge(name).await)
    }

    async fn set_gauge(&self, gauge: Gauge) -> Result<(), StorageError> {
        delegate!(self, s => s.set_gauge(gauge).await)
    }

    async fn list_gauge(&self) -> Result<Vec<Gauge>, StorageError> {
        delegate!(self, s => s.list_gauge().await)
    }

    async fn get_counter(&self, name: &str) -> Result<Option<Counter>, StorageError> {
        delegate!(self, s => s.get_counter(name).await)
    }

    async fn set_counter(&self, counter: Counter) -> Result<(), StorageError> {
        delegate!(self, s => s.set_counter(counter).await)
    }

    async fn list_counter(&self) -> Result<Vec<Counter>, StorageError> {
        delegate!(self, s => s.list_counter().await)
    }

    async fn batch_upsert_metrics(
        &self,
        records: &[MetricRecord],
    ) -> Result<Vec<MetricRecord>, StorageError> {
        delegate!(self, s => s.batch_upsert_metrics(records).await)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        delegate!(self, s => s.ping().await)
    }

    async fn close(&self) -> Result<(), StorageError> {
        delegate!(self, s => s.close().await)
    }
}
