//! Storage Layer
//!
//! SQLite-backed log store shared by every ingestion task and query caller:
//! - **Append**: one row per call under an exclusive lock section
//! - **Query**: cancellable, streaming range scans read in pages, each page under a shared lock section
//!
//! # Components
//!
//! - [`LogStore`]: Store handle (open, append, query, close)
//! - [`RecordSink`]: Append-only seam used by ingestion
//! - [`LogStream`]: Lazy stream of query results
//! - [`LogRecord`] / [`LogQuery`]: Stored row and range filter

pub mod db;
mod error;
mod schema;
mod store;
mod stream;
mod types;

pub use error::StorageError;
pub use store::{LogStore, QUERY_BUFFER_SIZE, QUERY_PAGE_SIZE, RecordSink};
pub use stream::LogStream;
pub use types::{LogQuery, LogRecord};
