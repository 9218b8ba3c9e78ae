//! Core ingestion traits and types.

use std::io;

use thiserror::Error;
use tokio::io::AsyncRead;

use crate::StorageError;

/// Errors that can occur while ingesting from a device.
///
/// None of these are fatal: the supervisor logs them and reconnects or keeps
/// reading.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The device could not be opened.
    #[error("unable to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Reading from an open device failed.
    #[error("read error: {0}")]
    Read(#[from] io::Error),

    /// Failed to append a record to storage.
    #[error("failed to store record: {0}")]
    Storage(#[from] StorageError),

    /// A supervisor for this device is already running.
    #[error("device already supervised: {0}")]
    AlreadyRunning(String),

    /// One or more supervisor tasks failed during shutdown.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

/// Opens byte streams for device addresses.
///
/// The production implementation is [`SerialTransport`](crate::SerialTransport);
/// any other byte source that can be split into lines works the same way.
#[async_trait::async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    /// Byte stream of an open device.
    type Stream: AsyncRead + Unpin + Send + 'static;

    /// Open `device` for reading.
    ///
    /// Failure is expected while a device is unplugged or not yet available.
    async fn open(&self, device: &str) -> io::Result<Self::Stream>;
}
