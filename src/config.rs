//! Configuration module for Pulse.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Agent settings (collector address, intervals, workers, keys, retry)
//! - Storage settings (backend selection, dump file, database pool)

mod agent;
mod storage;
mod validation;

pub use agent::AgentConfig;
pub use storage::StorageConfig;
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use agent::{
    DEFAULT_ADDRESS, DEFAULT_LOG_LEVEL, DEFAULT_POLL_INTERVAL, DEFAULT_RATE_LIMIT,
    DEFAULT_REPORT_INTERVAL,
};
pub use storage::{DEFAULT_FILE_STORAGE_PATH, DEFAULT_MAX_CONNECTIONS, DEFAULT_STORE_INTERVAL};
