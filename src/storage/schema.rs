//! Database schema definitions.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// SQL statement for creating the gauge table.
///
/// One row per gauge name; the value is overwritten on every upsert.
pub const GAUGE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS gauge (
    id    TEXT PRIMARY KEY,
    value REAL NOT NULL
);
"#;

/// SQL statement for creating the counter table.
///
/// One row per counter name; batch upserts add to the stored value.
pub const COUNTER_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS counter (
    id    TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

/// Initialize the database schema.
///
/// Creates both tables if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(GAUGE_TABLE_DDL).execute(pool.inner()).await?;
    sqlx::query(COUNTER_TABLE_DDL).execute(pool.inner()).await?;

    tracing::info!("Database schema initialized");
    Ok(())
}
