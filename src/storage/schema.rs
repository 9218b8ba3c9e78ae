//! Database schema definitions.

use sqlx::SqlitePool;

use crate::storage::StorageError;

/// SQL statement for creating the append-only `log` table.
///
/// No primary key beyond the implicit rowid, which also serves as the
/// tie-breaker for rows sharing a timestamp.
pub const LOG_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS log (
    ts      INTEGER NOT NULL,
    device  TEXT NOT NULL,
    msg     TEXT NOT NULL
)
"#;

/// Index for unfiltered range scans.
pub const LOG_TS_INDEX_DDL: &str = "CREATE INDEX IF NOT EXISTS log_ts_idx ON log (ts)";

/// Index for per-device range scans.
pub const LOG_DEVICE_TS_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS log_device_ts_idx ON log (device, ts)";

/// Initialize the database schema.
///
/// Creates the table and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for (n, statement) in [LOG_TABLE_DDL, LOG_TS_INDEX_DDL, LOG_DEVICE_TS_INDEX_DDL]
        .into_iter()
        .enumerate()
    {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            tracing::error!(statement = n + 1, error = %e, "Schema statement failed");
            e
        })?;
    }

    tracing::debug!("Database schema initialized");
    Ok(())
}
