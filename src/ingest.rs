//! Ingestion Layer
//!
//! One supervisor task per device keeps the device open, splits its byte
//! stream into lines and appends each line to the store as a [`LogRecord`].
//!
//! # Architecture
//!
//! - [`DeviceTransport`]: Opens a byte stream for a device address
//! - [`SerialTransport`]: Serial port implementation (115200 8N1)
//! - [`Supervisor`]: Reconnecting read loop for one device
//! - [`IngestRegistry`]: Spawns supervisors and shuts them down together
//!
//! # Example
//!
//! ```rust,no_run
//! use seriallog::{IngestRegistry, LogStore, SerialTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LogStore::open("logserial.db").await?;
//! let mut registry = IngestRegistry::new(SerialTransport::new(), store.clone());
//! registry.spawn("/dev/ttyUSB0")?;
//! // ...
//! registry.shutdown().await?;
//! store.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`LogRecord`]: crate::LogRecord

mod registry;
mod serial;
mod supervisor;
mod traits;

pub use registry::{DEFAULT_SHUTDOWN_TIMEOUT, IngestRegistry};
pub use serial::{BAUD_RATE, SerialTransport};
pub use supervisor::{DEFAULT_RETRY_INTERVAL, MAX_LINE_LEN, Supervisor};
pub use traits::{DeviceTransport, IngestError};
