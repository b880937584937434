//! Sending-side configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;

use super::validation::{ConfigError, expand_env_vars, require_non_zero, validate_backoff};

// =============================================================================
// Constants
// =============================================================================

/// Default collector address.
pub const DEFAULT_ADDRESS: &str = "http://localhost:8080";

/// Default collector poll interval (2 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default snapshot interval (10 seconds).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of delivery workers and queue slots.
pub const DEFAULT_RATE_LIMIT: usize = 3;

/// Default log level for this crate.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Agent Configuration
// =============================================================================

/// Agent configuration.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector base address; `http://` is assumed when no scheme is given.
    pub address: String,

    /// Interval between collector cycles.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Interval between snapshots.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Number of delivery workers, also the queue depth.
    pub rate_limit: usize,

    /// HMAC signing key. Supports `${VAR}` expansion.
    pub key: Option<String>,

    /// Path to the collector's RSA public key (SPKI PEM).
    pub crypto_key: Option<PathBuf>,

    /// Log level for this crate when `RUST_LOG` is not set.
    pub log_level: String,

    /// Delivery retry policy.
    pub retry: Backoff,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            rate_limit: DEFAULT_RATE_LIMIT,
            key: None,
            crypto_key: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            retry: Backoff::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without validating.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent address must not be empty".to_string(),
            ));
        }
        require_non_zero("poll_interval", self.poll_interval)?;
        require_non_zero("report_interval", self.report_interval)?;
        if self.rate_limit == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit must be positive".to_string(),
            ));
        }
        validate_backoff("agent", &self.retry)?;
        Ok(())
    }

    /// Signing key after `${VAR}` expansion; `None` when unset or empty.
    pub fn signing_key(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.address, "http://localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.rate_limit, 3);
        assert!(config.key.is_none());
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_config_from_yaml() {
        let yaml = r#"
address: "collector:9090"
poll_interval: 500ms
report_interval: 5s
rate_limit: 8
key: "${PULSE_TEST_AGENT_KEY_UNSET:-abc}"
retry:
  max_attempts: 5
  initial_delay: 200ms
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.address, "collector:9090");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.rate_limit, 8);
        assert_eq!(config.signing_key().as_deref(), Some("abc"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(200));
        // Unset retry fields keep their defaults.
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_config_empty_yaml_is_default() {
        assert_eq!(AgentConfig::from_yaml("").unwrap(), AgentConfig::default());
    }

    #[test]
    fn test_agent_config_validation() {
        let mut config = AgentConfig::default();
        config.rate_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.report_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("report_interval"));
    }

    #[test]
    fn test_agent_config_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "rate_limit: 2\n").unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.rate_limit, 2);
        assert!(AgentConfig::load(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_empty_key_disables_signing() {
        let mut config = AgentConfig::default();
        config.key = Some(String::new());
        assert!(config.signing_key().is_none());
    }
}
