//! SQLite backend implementation using sqlx.
//!
//! Provides connection pooling and the fixed set of tuning pragmas.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::StorageError;

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Marker that selects an in-memory database.
pub const MEMORY_LOCATION: &str = ":memory:";

/// Tuning pragmas applied on every connection, beyond the ones sqlx exposes
/// as typed options (journal mode, synchronous, foreign keys).
const PRAGMAS: &[(&str, &str)] = &[
    // cache size in kibibytes, approx 200MB
    ("cache_size", "-200000"),
    ("secure_delete", "OFF"),
    ("temp_store", "MEMORY"),
];

/// SQLite connection pool wrapper.
///
/// Wraps sqlx's SqlitePool with WAL mode and the store's tuning pragmas.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
    in_memory: bool,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("in_memory", &self.in_memory)
            .finish_non_exhaustive()
    }
}

impl SqlitePool {
    /// Open a SQLite database.
    ///
    /// # Arguments
    ///
    /// * `location` - File path, or any string containing `:memory:` for an
    ///   in-memory database
    ///
    /// # Configuration
    ///
    /// - WAL journal mode for concurrent readers alongside the writer
    /// - Normal synchronous mode for performance with durability
    /// - Create database file if it does not exist
    pub async fn open(location: &str) -> Result<Self, StorageError> {
        Self::open_with(location, true).await
    }

    /// Open a SQLite database, optionally refusing to create a missing file.
    pub async fn open_with(location: &str, create_if_missing: bool) -> Result<Self, StorageError> {
        let in_memory = is_memory_location(location);

        let options = if in_memory {
            // sqlx maps this to a uniquely named shared-cache database, so every
            // connection of the pool sees the same data.
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(Path::new(location))
        };

        let options = PRAGMAS.iter().fold(
            options
                .create_if_missing(create_if_missing)
                .foreign_keys(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            |options, (key, value)| options.pragma(*key, *value),
        );

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT);

        if in_memory {
            // The in-memory database lives only as long as one connection does.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;

        Ok(Self {
            inner: pool,
            in_memory,
        })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Whether this pool is backed by an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Returns `true` if `location` designates an in-memory database.
pub fn is_memory_location(location: &str) -> bool {
    location.contains(MEMORY_LOCATION)
}
