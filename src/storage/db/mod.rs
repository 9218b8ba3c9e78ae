//! Database backend.
//!
//! - `SqlitePool`: Connection pool wrapper for SQLite with the store's pragmas
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::open("logserial.db").await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::{MEMORY_LOCATION, SqlitePool, is_memory_location};
