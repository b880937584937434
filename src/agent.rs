//! Agent Layer
//!
//! Sending-side pipeline: collectors fill a shared [`MetricRegistry`], the
//! [`Dispatcher`] snapshots it on every report tick into a bounded queue, and a
//! [`WorkerPool`] ships each snapshot through a [`MetricSender`] with retry.
//!
//! # Architecture
//!
//! ```text
//! RuntimeCollector ─┐
//!                   ├─> MetricRegistry ─> Dispatcher ─> queue(rate_limit) ─> WorkerPool ─> HttpTransport
//! HostCollector ────┘
//! ```
//!
//! Every task observes one `CancellationToken`; [`Agent::shutdown`] cancels it
//! and waits for the tasks to finish.

pub mod collector;
mod dispatcher;
mod registry;
pub mod transport;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use collector::{
    Collector, CollectorError, CollectorScheduler, HostCollector, JobInfo, RuntimeCollector,
};
pub use dispatcher::Dispatcher;
pub use registry::{MetricRegistry, RegistryGuard, Snapshot};
pub use transport::{HttpTransport, MetricSender, TransportError};
pub use worker::WorkerPool;

use crate::alloc::TrackingAllocator;
use crate::codec::{self, CodecError, PayloadEncoder};
use crate::config::{AgentConfig, ConfigError};
use crate::retry::{RetryEvent, Retrier};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent startup and shutdown failures.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Builder for a running [`Agent`].
///
/// # Example
///
/// ```rust,no_run
/// use pulse::agent::AgentBuilder;
/// use pulse::config::AgentConfig;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), pulse::agent::AgentError> {
/// let cancel = CancellationToken::new();
/// let agent = AgentBuilder::new(AgentConfig::default()).start(cancel.clone())?;
/// cancel.cancel();
/// agent.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct AgentBuilder {
    config: AgentConfig,
    allocator: Option<&'static TrackingAllocator>,
    sender: Option<Arc<dyn MetricSender>>,
    host_metrics: bool,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("config", &self.config)
            .field("host_metrics", &self.host_metrics)
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            allocator: None,
            sender: None,
            host_metrics: true,
        }
    }

    /// Report heap gauges from the process's global allocator.
    pub fn with_allocator(mut self, allocator: &'static TrackingAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Replace the HTTP transport built from the configuration.
    pub fn with_sender(mut self, sender: Arc<dyn MetricSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Enable or disable the host collector (default: enabled).
    pub fn host_metrics(mut self, enabled: bool) -> Self {
        self.host_metrics = enabled;
        self
    }

    /// Validate the configuration and spawn every task.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Fails on invalid configuration, an unreadable public key, or an HTTP
    /// client that cannot be built.
    pub fn start(self, cancel: CancellationToken) -> Result<Agent, AgentError> {
        self.config.validate()?;
        let config = self.config;

        let sender = match self.sender {
            Some(sender) => sender,
            None => Arc::new(build_transport(&config)?),
        };

        let registry = MetricRegistry::new();

        let mut scheduler = CollectorScheduler::new(registry.clone(), cancel.clone());
        let mut runtime = RuntimeCollector::new(config.poll_interval);
        if let Some(allocator) = self.allocator {
            runtime = runtime.with_allocator(allocator);
        }
        scheduler.spawn(runtime);
        if self.host_metrics {
            scheduler.spawn(HostCollector::new(config.poll_interval));
        }

        let (tx, rx) = mpsc::channel(config.rate_limit);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            config.report_interval,
            tx,
            cancel.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run());

        let retrier = Retrier::new(config.retry.clone()).with_observer(log_retry);
        let pool = WorkerPool::spawn(config.rate_limit, rx, sender, retrier, cancel.clone());

        tracing::info!(
            poll_interval = ?config.poll_interval,
            report_interval = ?config.report_interval,
            workers = config.rate_limit,
            "Agent started"
        );

        Ok(Agent {
            registry,
            cancel,
            scheduler,
            dispatcher,
            pool,
        })
    }
}

/// Transport for the configured address, signing key and public key.
pub fn build_transport(config: &AgentConfig) -> Result<HttpTransport, AgentError> {
    let mut encoder = PayloadEncoder::new();
    if let Some(key) = config.signing_key() {
        encoder = encoder.with_signing_key(key);
    }
    if let Some(path) = &config.crypto_key {
        encoder = encoder.with_public_key(codec::load_public_key(path)?);
    }
    Ok(HttpTransport::new(&config.address, encoder)?)
}

fn log_retry(event: &RetryEvent<'_>) {
    tracing::warn!(
        attempt = event.attempt,
        delay = ?event.delay,
        error = %event.error,
        "Delivery failed, retrying"
    );
}

/// A running agent.
pub struct Agent {
    registry: MetricRegistry,
    cancel: CancellationToken,
    scheduler: CollectorScheduler,
    dispatcher: JoinHandle<()>,
    pool: WorkerPool,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("scheduler", &self.scheduler)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn jobs(&self) -> &[JobInfo] {
        self.scheduler.list_jobs()
    }

    /// Stop with the default timeout.
    pub async fn shutdown(self) -> Result<(), AgentError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Cancel every task and wait for them within `timeout`.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<(), AgentError> {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + timeout;

        self.scheduler.shutdown_with_timeout(timeout).await?;

        let rest = async {
            if let Err(e) = self.dispatcher.await {
                tracing::warn!(error = %e, "Dispatcher task panicked");
            }
            self.pool.join().await;
        };
        if tokio::time::timeout_at(deadline, rest).await.is_err() {
            tracing::warn!("Agent shutdown timed out");
            return Err(AgentError::ShutdownTimeout(timeout));
        }

        tracing::info!("Agent shutdown complete");
        Ok(())
    }
}
