//! In-memory metric store with optional JSON dump persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StorageConfig;
use crate::model::{Counter, Gauge, Metric, MetricRecord, ModelError};
use crate::storage::{MetricStore, StorageError};

/// Both maps, in the dump file layout `{"gauge": {...}, "counter": {...}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    gauge: HashMap<String, Gauge>,
    #[serde(default)]
    counter: HashMap<String, Counter>,
}

impl State {
    /// Apply one record with gauge-overwrite / counter-add semantics.
    fn upsert(&mut self, record: &MetricRecord) -> Result<MetricRecord, StorageError> {
        match record.validate()? {
            Metric::Gauge(g) => {
                let value = g.value;
                self.gauge
                    .entry(g.name.clone())
                    .and_modify(|stored| stored.set(value))
                    .or_insert(g);
                Ok(MetricRecord::gauge(&record.id, value))
            }
            Metric::Counter(c) => {
                let stored = self
                    .counter
                    .entry(c.name.clone())
                    .or_insert_with(|| Counter::new(&c.name, 0));
                stored.increment(c.value)?;
                Ok(MetricRecord::counter(&record.id, stored.value))
            }
        }
    }
}

/// Where and how often the state is persisted.
#[derive(Debug, Clone)]
struct Persistence {
    path: PathBuf,
    /// Zero means save on every write.
    interval: Duration,
}

impl Persistence {
    fn is_sync(&self) -> bool {
        self.interval.is_zero()
    }
}

/// Lock-protected gauge and counter maps.
///
/// `set_*` store values as given; `batch_upsert_metrics` applies records in
/// order under one write lock and stops at the first invalid record, keeping
/// the records before it. Unlike [`DatabaseStore`], a failed batch is not
/// rolled back.
///
/// [`DatabaseStore`]: crate::storage::DatabaseStore
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    persistence: Option<Persistence>,
    cancel: CancellationToken,
    dump_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("persistence", &self.persistence)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Store without any file persistence.
    pub fn new() -> Self {
        Self::with_state(State::default(), None)
    }

    /// Open a store per `config`: restore the dump file if asked to, and start
    /// the periodic dump task when the interval is positive.
    ///
    /// Must be called inside a Tokio runtime when a dump interval is set.
    ///
    /// # Errors
    /// Fails if an existing, non-empty dump file cannot be read or parsed.
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let persistence = config.dump_path().map(|path| Persistence {
            path: path.to_path_buf(),
            interval: config.store_interval,
        });

        let state = match &persistence {
            Some(p) if config.restore => load_dump(&p.path).await?,
            _ => State::default(),
        };

        let store = Self::with_state(state, persistence);
        store.start_dump_task();

        tracing::info!(
            file_storage_path = ?config.dump_path(),
            store_interval = ?config.store_interval,
            restore = config.restore,
            "Memory store initialized"
        );
        Ok(store)
    }

    fn with_state(state: State, persistence: Option<Persistence>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            persistence,
            cancel: CancellationToken::new(),
            dump_task: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn start_dump_task(&self) {
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        if persistence.is_sync() {
            return;
        }

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + persistence.interval,
                persistence.interval,
            );
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let guard = state.write().await;
                if let Err(e) = save_dump(&persistence.path, &guard).await {
                    tracing::error!(path = %persistence.path.display(), error = %e, "Store dump failed");
                }
            }
            tracing::debug!("Dump task stopped");
        });

        if let Ok(mut slot) = self.dump_task.lock() {
            *slot = Some(handle);
        }
    }

    /// Save now if every write must be persisted immediately.
    async fn save_if_sync(&self, state: &State) -> Result<(), StorageError> {
        match &self.persistence {
            Some(p) if p.is_sync() => save_dump(&p.path, state).await,
            _ => Ok(()),
        }
    }

    /// Write the current state to the dump file, if one is configured.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        let guard = self.state.write().await;
        save_dump(&p.path, &guard).await
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize `state` and atomically replace the file at `path`.
async fn save_dump(path: &Path, state: &State) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, &data).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "Store dumped");
    Ok(())
}

/// Read a dump file; a missing or empty file yields an empty state.
async fn load_dump(path: &Path) -> Result<State, StorageError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(State::default()),
        Err(e) => return Err(e.into()),
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(State::default());
    }
    let state: State = serde_json::from_slice(&data)?;
    tracing::info!(
        path = %path.display(),
        gauges = state.gauge.len(),
        counters = state.counter.len(),
        "Store restored from dump"
    );
    Ok(state)
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn get_gauge(&self, name: &str) -> Result<Option<Gauge>, StorageError> {
        Ok(self.state.read().await.gauge.get(name).cloned())
    }

    async fn set_gauge(&self, gauge: Gauge) -> Result<(), StorageError> {
        if !gauge.value.is_finite() {
            return Err(ModelError::NonFiniteValue(gauge.name).into());
        }
        let mut state = self.state.write().await;
        state.gauge.insert(gauge.name.clone(), gauge);
        self.save_if_sync(&state).await
    }

    async fn list_gauge(&self) -> Result<Vec<Gauge>, StorageError> {
        Ok(self.state.read().await.gauge.values().cloned().collect())
    }

    async fn get_counter(&self, name: &str) -> Result<Option<Counter>, StorageError> {
        Ok(self.state.read().await.counter.get(name).cloned())
    }

    async fn set_counter(&self, counter: Counter) -> Result<(), StorageError> {
        if counter.value < 0 {
            return Err(StorageError::InvalidData(format!(
                "counter '{}' cannot hold negative value {}",
                counter.name, counter.value
            )));
        }
        let mut state = self.state.write().await;
        state.counter.insert(counter.name.clone(), counter);
        self.save_if_sync(&state).await
    }

    async fn list_counter(&self) -> Result<Vec<Counter>, StorageError> {
        Ok(self.state.read().await.counter.values().cloned().collect())
    }

    async fn batch_upsert_metrics(
        &self,
        records: &[MetricRecord],
    ) -> Result<Vec<MetricRecord>, StorageError> {
        let mut state = self.state.write().await;
        let mut results = Vec::with_capacity(records.len());
        let mut failure = None;

        for record in records {
            match state.upsert(record) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::debug!(metric = %record.id, error = %e, "Batch aborted");
                    failure = Some(e);
                    break;
                }
            }
        }

        // Records applied before a failure stay applied, so persist them too.
        if results.is_empty() {
            return failure.map_or(Ok(results), Err);
        }
        let saved = self.save_if_sync(&state).await;
        match (failure, saved) {
            (Some(e), Err(save_err)) => {
                tracing::error!(error = %save_err, "Store dump failed after partial batch");
                Err(e)
            }
            (Some(e), Ok(())) => Err(e),
            (None, Err(save_err)) => Err(save_err),
            (None, Ok(())) => Ok(results),
        }
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Err(StorageError::PingUnsupported)
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let handle = self.dump_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Dump task panicked");
        }
        self.flush().await?;
        tracing::info!("Memory store closed");
        Ok(())
    }
}
