//! Receiving-side storage configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;

use super::validation::{ConfigError, validate_backoff};

/// Default dump file of the memory backend.
pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";

/// Default dump interval (300 seconds).
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

/// Default database pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Storage backend selection and tuning.
///
/// The database backend is used when `database_dsn` is set; otherwise the
/// memory backend, optionally persisted to `file_storage_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Dump file for the memory backend; `None` disables persistence.
    pub file_storage_path: Option<PathBuf>,

    /// Dump period; zero saves synchronously on every write.
    #[serde(with = "humantime_serde")]
    pub store_interval: Duration,

    /// Load the dump file on startup.
    pub restore: bool,

    /// SQLite connection string (`sqlite:metrics.db`, `sqlite::memory:`).
    pub database_dsn: Option<String>,

    /// Database connection pool size.
    pub max_connections: u32,

    /// Retry policy for database operations.
    pub retry: Backoff,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_storage_path: Some(PathBuf::from(DEFAULT_FILE_STORAGE_PATH)),
            store_interval: DEFAULT_STORE_INTERVAL,
            restore: true,
            database_dsn: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            retry: Backoff::default(),
        }
    }
}

impl StorageConfig {
    /// In-memory backend with no dump file.
    pub fn memory() -> Self {
        Self {
            file_storage_path: None,
            restore: false,
            ..Self::default()
        }
    }

    /// Database backend at `dsn`.
    pub fn database(dsn: impl Into<String>) -> Self {
        Self {
            database_dsn: Some(dsn.into()),
            ..Self::default()
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dsn) = &self.database_dsn
            && dsn.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "database_dsn must not be empty when set".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be positive".to_string(),
            ));
        }
        validate_backoff("storage", &self.retry)?;
        Ok(())
    }

    /// The dump path, if persistence is enabled.
    pub fn dump_path(&self) -> Option<&Path> {
        self.file_storage_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}
