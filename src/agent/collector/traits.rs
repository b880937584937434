//! Core collector trait and types.

use std::time::Duration;

use thiserror::Error;

use crate::agent::registry::RegistryGuard;
use crate::model::ModelError;

/// Errors that can occur during one collection cycle.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// A sampled value was rejected by the registry.
    #[error("invalid metric: {0}")]
    Metric(#[from] ModelError),

    /// The underlying data source could not be read.
    #[error("source unavailable: {0}")]
    Source(String),

    /// Background tasks did not stop in time.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// A periodic metric source.
///
/// The scheduler calls [`Collector::collect`] once per tick while holding the
/// registry lock, so an implementation should sample and write in one pass and
/// never block for long.
///
/// A failed cycle is logged and skipped; the collector keeps running on its
/// next tick.
pub trait Collector: Send + 'static {
    /// Name used in logs and job listings.
    fn name(&self) -> &str;

    /// Time between two cycles.
    fn interval(&self) -> Duration;

    /// Sample the source and write the values into the registry.
    fn collect(&mut self, metrics: &mut RegistryGuard<'_>) -> Result<(), CollectorError>;
}
