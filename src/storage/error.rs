//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, file, validation, etc.).

use std::io::ErrorKind;

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ModelError;
use crate::retry::RetryError;

/// SQLite primary result codes treated as transient.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A store operation's query failed.
    #[error(
        "{op}{} failed: {source}",
        .metric.as_deref().map(|m| format!(" '{m}'")).unwrap_or_default()
    )]
    Query {
        op: &'static str,
        metric: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Dump file could not be read or written.
    #[error("dump file error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record failed validation; nothing was written for it.
    #[error("invalid metric: {0}")]
    InvalidRecord(#[from] ModelError),

    /// The storage configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid data in database (e.g., a negative stored counter).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The backend has no external dependency to probe.
    #[error("memory store does not support ping")]
    PingUnsupported,

    /// The store was closed, or the operation was cancelled during retry.
    #[error("storage closed")]
    Closed,

    /// Transient failures persisted past the retry budget.
    #[error("gave up after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Wrap a sqlx error with the failing operation and metric name.
    pub(crate) fn query(
        op: &'static str,
        metric: Option<&str>,
    ) -> impl FnOnce(sqlx::Error) -> Self + use<> {
        let metric = metric.map(str::to_owned);
        move |source| Self::Query { op, metric, source }
    }

    /// Connection-broken, end-of-stream, pool-exhaustion and busy conditions.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Database(e) | Self::Query { source: e, .. } => is_recoverable_sqlx(e),
            _ => false,
        }
    }
}

fn is_recoverable_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
                | ErrorKind::NotConnected
        ),
        sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}

impl From<RetryError<StorageError>> for StorageError {
    fn from(err: RetryError<StorageError>) -> Self {
        match err {
            RetryError::Cancelled => Self::Closed,
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, source } => Self::RetriesExhausted {
                attempts,
                source: Box::new(source),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let refused = StorageError::Database(sqlx::Error::Io(std::io::Error::from(
            ErrorKind::ConnectionRefused,
        )));
        assert!(refused.is_recoverable());

        let eof = StorageError::Database(sqlx::Error::Io(std::io::Error::from(
            ErrorKind::UnexpectedEof,
        )));
        assert!(eof.is_recoverable());

        assert!(StorageError::Database(sqlx::Error::PoolTimedOut).is_recoverable());
        assert!(!StorageError::Database(sqlx::Error::RowNotFound).is_recoverable());
        assert!(!StorageError::InvalidRecord(ModelError::EmptyName).is_recoverable());
        assert!(
            !StorageError::Io(std::io::Error::from(ErrorKind::ConnectionRefused)).is_recoverable()
        );
    }

    #[test]
    fn test_query_error_context() {
        let err = StorageError::query("get_gauge", Some("Alloc"))(sqlx::Error::PoolTimedOut);
        let message = err.to_string();
        assert!(message.starts_with("get_gauge 'Alloc' failed:"), "{message}");
        assert!(err.is_recoverable());

        let err = StorageError::query("list_counter", None)(sqlx::Error::RowNotFound);
        assert!(err.to_string().starts_with("list_counter failed:"));
        assert!(!err.is_recoverable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_retry_error() {
        let err: StorageError = RetryError::<StorageError>::Cancelled.into();
        assert!(matches!(err, StorageError::Closed));

        let err: StorageError = RetryError::Permanent(StorageError::PingUnsupported).into();
        assert!(matches!(err, StorageError::PingUnsupported));

        let err: StorageError = RetryError::Exhausted {
            attempts: 3,
            source: StorageError::Database(sqlx::Error::PoolTimedOut),
        }
        .into();
        assert!(matches!(err, StorageError::RetriesExhausted { attempts: 3, .. }));
    }
}
