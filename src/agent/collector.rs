//! Collector Layer
//!
//! Periodic metric sources that write into the shared [`MetricRegistry`].
//! Each collector runs in its own Tokio task on its own interval.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing metric sources
//! - [`CollectorScheduler`]: Spawns collectors and handles graceful shutdown
//! - [`RuntimeCollector`]: Heap, process and scheduler metrics of the agent
//! - [`HostCollector`]: Memory and per-core CPU of the host
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse::agent::{CollectorScheduler, HostCollector, MetricRegistry, RuntimeCollector};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let registry = MetricRegistry::new();
//! let mut scheduler = CollectorScheduler::new(registry.clone(), CancellationToken::new());
//! scheduler.spawn(RuntimeCollector::new(Duration::from_secs(2)));
//! scheduler.spawn(HostCollector::new(Duration::from_secs(2)));
//! # }
//! ```
//!
//! [`MetricRegistry`]: crate::agent::MetricRegistry

mod host;
mod runtime;
mod scheduler;
mod traits;

pub use host::{HostCollector, cpu_metric_name};
pub use runtime::{POLL_COUNT, RANDOM_VALUE, RuntimeCollector};
pub use scheduler::{CollectorScheduler, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo};
pub use traits::{Collector, CollectorError};
