//! SQLite-backed metric store.

use std::future::Future;

use async_trait::async_trait;
use sqlx::Row;
use tokio_util::sync::CancellationToken;

use crate::config::StorageConfig;
use crate::model::{Counter, Gauge, Metric, MetricRecord, ModelError};
use crate::retry::Retrier;
use crate::storage::db::SqlitePool;
use crate::storage::schema::init_schema;
use crate::storage::{MetricStore, StorageError};

// ============================================================================
// SQL
// ============================================================================

const UPSERT_GAUGE: &str = "INSERT INTO gauge (id, value) VALUES (?, ?) \
     ON CONFLICT (id) DO UPDATE SET value = excluded.value";

const SET_COUNTER: &str = "INSERT INTO counter (id, value) VALUES (?, ?) \
     ON CONFLICT (id) DO UPDATE SET value = excluded.value";

/// Returns no row when the sum would exceed `i64::MAX`.
const ADD_COUNTER: &str = "INSERT INTO counter (id, value) VALUES (?, ?) \
     ON CONFLICT (id) DO UPDATE SET value = counter.value + excluded.value \
     WHERE counter.value <= 9223372036854775807 - excluded.value \
     RETURNING value";

/// Relational store with one table per metric kind.
///
/// Every operation runs under the configured retry policy, retrying only
/// connection-class and busy errors. A batch is a single transaction: any
/// invalid record rolls back the whole batch.
pub struct DatabaseStore {
    pool: SqlitePool,
    retrier: Retrier,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DatabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseStore")
            .field("pool", &self.pool)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

impl DatabaseStore {
    /// Connect to `config.database_dsn` and create the tables.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let dsn = config
            .database_dsn
            .as_deref()
            .ok_or_else(|| StorageError::InvalidData("database_dsn is not set".to_string()))?;

        let retrier = Retrier::new(config.retry.clone()).with_observer(|event| {
            tracing::warn!(
                attempt = event.attempt,
                delay = ?event.delay,
                error = %event.error,
                "Database operation failed, retrying"
            );
        });
        let cancel = CancellationToken::new();

        let pool = retrier
            .run_if(
                &cancel,
                || SqlitePool::connect(dsn, config.max_connections),
                StorageError::is_recoverable,
            )
            .await
            .map_err(StorageError::from)?;
        init_schema(&pool).await?;

        tracing::info!(max_connections = config.max_connections, "Database store initialized");
        Ok(Self {
            pool,
            retrier,
            cancel,
        })
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if self.pool.is_closed() {
            return Err(StorageError::Closed);
        }
        self.retrier
            .run_if(&self.cancel, op, StorageError::is_recoverable)
            .await
            .map_err(StorageError::from)
    }

    async fn batch_once(&self, records: &[MetricRecord]) -> Result<Vec<MetricRecord>, StorageError> {
        const OP: &str = "batch_upsert_metrics";
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(StorageError::query(OP, None))?;
        let mut results = Vec::with_capacity(records.len());

        for record in records {
            // Returning early drops `tx`, which rolls back.
            match record.validate()? {
                Metric::Gauge(g) => {
                    sqlx::query(UPSERT_GAUGE)
                        .bind(&g.name)
                        .bind(g.value)
                        .execute(&mut *tx)
                        .await
                        .map_err(StorageError::query(OP, Some(g.name.as_str())))?;
                    results.push(MetricRecord::gauge(g.name, g.value));
                }
                Metric::Counter(c) => {
                    let total: Option<i64> = sqlx::query_scalar(ADD_COUNTER)
                        .bind(&c.name)
                        .bind(c.value)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(StorageError::query(OP, Some(c.name.as_str())))?;
                    let total = total.ok_or_else(|| ModelError::Overflow {
                        name: c.name.clone(),
                        delta: c.value,
                    })?;
                    results.push(MetricRecord::counter(c.name, total));
                }
            }
        }

        tx.commit().await.map_err(StorageError::query(OP, None))?;
        Ok(results)
    }
}

#[async_trait]
impl MetricStore for DatabaseStore {
    async fn get_gauge(&self, name: &str) -> Result<Option<Gauge>, StorageError> {
        self.with_retry(|| async move {
            let value: Option<f64> = sqlx::query_scalar("SELECT value FROM gauge WHERE id = ?")
                .bind(name)
                .fetch_optional(self.pool.inner())
                .await
                .map_err(StorageError::query("get_gauge", Some(name)))?;
            Ok::<_, StorageError>(value.map(|v| Gauge::new(name, v)))
        })
        .await
    }

    async fn set_gauge(&self, gauge: Gauge) -> Result<(), StorageError> {
        if !gauge.value.is_finite() {
            return Err(ModelError::NonFiniteValue(gauge.name).into());
        }
        let gauge = &gauge;
        self.with_retry(|| async move {
            sqlx::query(UPSERT_GAUGE)
                .bind(&gauge.name)
                .bind(gauge.value)
                .execute(self.pool.inner())
                .await
                .map_err(StorageError::query("set_gauge", Some(gauge.name.as_str())))?;
            Ok::<_, StorageError>(())
        })
        .await
    }

    async fn list_gauge(&self) -> Result<Vec<Gauge>, StorageError> {
        self.with_retry(|| async move {
            let rows = sqlx::query("SELECT id, value FROM gauge ORDER BY id")
                .fetch_all(self.pool.inner())
                .await
                .map_err(StorageError::query("list_gauge", None))?;
            rows.iter()
                .map(|row| Ok(Gauge::new(row.try_get::<String, _>("id")?, row.try_get("value")?)))
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(StorageError::query("list_gauge", None))
        })
        .await
    }

    async fn get_counter(&self, name: &str) -> Result<Option<Counter>, StorageError> {
        self.with_retry(|| async move {
            let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counter WHERE id = ?")
                .bind(name)
                .fetch_optional(self.pool.inner())
                .await
                .map_err(StorageError::query("get_counter", Some(name)))?;
            Ok::<_, StorageError>(value.map(|v| Counter::new(name, v)))
        })
        .await
    }

    async fn set_counter(&self, counter: Counter) -> Result<(), StorageError> {
        if counter.value < 0 {
            return Err(StorageError::InvalidData(format!(
                "counter '{}' cannot hold negative value {}",
                counter.name, counter.value
            )));
        }
        let counter = &counter;
        self.with_retry(|| async move {
            sqlx::query(SET_COUNTER)
                .bind(&counter.name)
                .bind(counter.value)
                .execute(self.pool.inner())
                .await
                .map_err(StorageError::query("set_counter", Some(counter.name.as_str())))?;
            Ok::<_, StorageError>(())
        })
        .await
    }

    async fn list_counter(&self) -> Result<Vec<Counter>, StorageError> {
        self.with_retry(|| async move {
            let rows = sqlx::query("SELECT id, value FROM counter ORDER BY id")
                .fetch_all(self.pool.inner())
                .await
                .map_err(StorageError::query("list_counter", None))?;
            rows.iter()
                .map(|row| {
                    Ok(Counter::new(
                        row.try_get::<String, _>("id")?,
                        row.try_get("value")?,
                    ))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(StorageError::query("list_counter", None))
        })
        .await
    }

    async fn batch_upsert_metrics(
        &self,
        records: &[MetricRecord],
    ) -> Result<Vec<MetricRecord>, StorageError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let results = self.with_retry(|| self.batch_once(records)).await?;
        tracing::debug!(count = results.len(), "Batch committed");
        Ok(results)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.with_retry(|| async move {
            sqlx::query("SELECT 1")
                .execute(self.pool.inner())
                .await
                .map_err(StorageError::query("ping", None))?;
            Ok::<_, StorageError>(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.cancel.cancel();
        self.pool.close().await;
        tracing::info!("Database store closed");
        Ok(())
    }
}
