//! Storage backend selection.

use crate::config::StorageConfig;
use crate::storage::{DatabaseStore, MemoryStore, Storage, StorageError};

/// Opens the backend described by a [`StorageConfig`].
///
/// The database backend is chosen when `database_dsn` is set, the memory
/// backend otherwise.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    config: StorageConfig,
}

impl StorageBuilder {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Validate the configuration and open the selected backend.
    ///
    /// Memory dump restore and database schema creation happen here, before
    /// any caller can read or write.
    pub async fn build(self) -> Result<Storage, StorageError> {
        self.config.validate()?;

        let storage = if self.config.database_dsn.is_some() {
            Storage::Database(DatabaseStore::connect(&self.config).await?)
        } else {
            Storage::Memory(MemoryStore::open(&self.config).await?)
        };

        tracing::info!(backend = storage.backend(), "Storage initialized");
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricRecord;
    use crate::storage::MetricStore;

    #[tokio::test]
    async fn test_selects_memory_without_dsn() {
        let storage = StorageBuilder::new(StorageConfig::memory())
            .build()
            .await
            .unwrap();
        assert!(matches!(storage, Storage::Memory(_)));
        assert!(storage.ping().await.is_err());
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_selects_database_with_dsn() {
        let storage = StorageBuilder::new(StorageConfig::database("sqlite::memory:"))
            .build()
            .await
            .unwrap();
        assert_eq!(storage.backend(), "database");
        storage.ping().await.unwrap();

        let result = storage
            .batch_upsert_metrics(&[MetricRecord::counter("c", 2)])
            .await
            .unwrap();
        assert_eq!(result, vec![MetricRecord::counter("c", 2)]);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = StorageConfig::memory();
        config.max_connections = 0;
        let err = StorageBuilder::new(config).build().await.unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
