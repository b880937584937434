//! Pulse - Telemetry Agent and Metric Storage
//!
//! This crate provides both halves of a point collection-and-storage
//! pipeline. The sending side runs inside the `pulse-agent` binary; the
//! receiving side is a library a collector service embeds.
//!
//! # Architecture
//!
//! - **Agent**: periodic collectors, snapshot dispatch, bounded worker pool
//! - **Retry**: bounded exponential backoff shared by transport and storage
//! - **Codec**: gzip, HMAC-SHA256 signing and RSA-OAEP payload encryption
//! - **Storage**: memory backend with JSON dumps, or transactional SQLite
//! - **Service**: thin operations layer over a storage backend
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse::config::StorageConfig;
//! use pulse::model::MetricRecord;
//! use pulse::service::MetricService;
//! use pulse::storage::StorageBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = StorageBuilder::new(StorageConfig::database("sqlite:metrics.db"))
//!     .build()
//!     .await?;
//! let service = MetricService::new(storage);
//! service
//!     .update_metrics(&[MetricRecord::counter("PollCount", 5)])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod alloc;
pub mod codec;
pub mod config;
pub mod model;
pub mod retry;
pub mod service;
pub mod storage;

pub use agent::{Agent, AgentBuilder, AgentError};
pub use model::{Counter, Gauge, Metric, MetricKind, MetricRecord};
pub use retry::{Backoff, Retrier, RetryError};
pub use service::MetricService;
pub use storage::{MetricStore, Storage, StorageBuilder, StorageError};
