//! seriallog - Serial Line Logger
//!
//! This crate captures newline-delimited text from serial devices, stamps
//! every line with its arrival time and stores it in SQLite, where it can be
//! queried back by time range and device. It can be used as a library or run
//! as the `seriallog` binary.
//!
//! # Architecture
//!
//! - **Ingestion**: One reconnecting supervisor task per device
//! - **Storage**: Append-only SQLite table with streaming, cancellable range queries
//! - **Configuration**: YAML file plus CLI/environment overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use seriallog::{LogQuery, LogStore};
//! use tokio_stream::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), seriallog::StorageError> {
//! let store = LogStore::open("logserial.db").await?;
//!
//! let query = LogQuery::last(std::time::Duration::from_secs(600)).with_device("/dev/ttyUSB0");
//! let mut stream = store.query(query, CancellationToken::new());
//! while let Some(record) = stream.next().await {
//!     let record = record?;
//!     println!("{} {}", record.ts, record.message);
//! }
//!
//! store.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ingest;
pub mod storage;

pub use ingest::{DeviceTransport, IngestError, IngestRegistry, SerialTransport, Supervisor};
pub use storage::{LogQuery, LogRecord, LogStore, LogStream, RecordSink, StorageError};
