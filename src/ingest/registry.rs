//! Ingestion registry for managing supervisor lifecycle.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::ingest::supervisor::DEFAULT_RETRY_INTERVAL;
use crate::ingest::{DeviceTransport, IngestError, Supervisor};
use crate::storage::RecordSink;

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry running one [`Supervisor`] task per device.
///
/// All supervisors share a single shutdown token; there is no per-device stop.
pub struct IngestRegistry<T, S> {
    transport: T,
    sink: S,
    retry_interval: Duration,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    devices: Vec<String>,
}

impl<T, S> std::fmt::Debug for IngestRegistry<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRegistry")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl<T, S> IngestRegistry<T, S>
where
    T: DeviceTransport + Clone,
    S: RecordSink + Clone,
{
    /// Create a new registry feeding `sink` through `transport`.
    pub fn new(transport: T, sink: S) -> Self {
        Self {
            transport,
            sink,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
            devices: Vec::new(),
        }
    }

    /// Set the reconnect delay for supervisors spawned afterwards.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Spawn a supervisor for `device`.
    ///
    /// # Errors
    /// Returns `IngestError::AlreadyRunning` if the device already has one.
    pub fn spawn(&mut self, device: impl Into<String>) -> Result<(), IngestError> {
        let device = device.into();
        if self.devices.contains(&device) {
            return Err(IngestError::AlreadyRunning(device));
        }

        let supervisor = Supervisor::new(device.clone(), self.transport.clone(), self.sink.clone())
            .with_retry_interval(self.retry_interval);
        self.tasks.spawn(supervisor.run(self.shutdown.child_token()));

        tracing::info!(device = %device, "Supervisor spawned");
        self.devices.push(device);
        Ok(())
    }

    /// Devices with a running supervisor.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Number of running supervisors.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Stop all supervisors with the default timeout.
    pub async fn shutdown(self) -> Result<(), IngestError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop all supervisors, aborting any still running after `timeout`.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), IngestError> {
        let device_count = self.devices.len();
        self.shutdown.cancel();

        let joined = tokio::time::timeout(timeout, async {
            let mut failures = Vec::new();
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    failures.push(e.to_string());
                }
            }
            failures
        })
        .await;

        match joined {
            Ok(failures) if failures.is_empty() => {
                tracing::info!(device_count, "Ingestion shutdown complete");
                Ok(())
            }
            Ok(failures) => {
                tracing::error!(device_count, ?failures, "Supervisor tasks failed");
                Err(IngestError::Shutdown(failures.join("; ")))
            }
            Err(_) => {
                tracing::warn!(device_count, "Ingestion shutdown timed out, aborting");
                self.tasks.abort_all();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogQuery, LogStore};
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport where every device replays the same two lines once.
    #[derive(Clone, Default)]
    struct EchoTransport {
        opens: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl DeviceTransport for EchoTransport {
        type Stream = io::Cursor<Vec<u8>>;

        async fn open(&self, device: &str) -> io::Result<Self::Stream> {
            if self.opens.fetch_add(1, Ordering::SeqCst) >= 2 {
                return Err(io::Error::new(io::ErrorKind::NotFound, "unplugged"));
            }
            Ok(io::Cursor::new(format!("hello from {device}\n").into_bytes()))
        }
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let store = LogStore::open(":memory:").await.unwrap();
        let mut registry = IngestRegistry::new(EchoTransport::default(), store.clone())
            .with_retry_interval(Duration::from_millis(10));

        registry.spawn("a").unwrap();
        registry.spawn("b").unwrap();
        assert_eq!(registry.device_count(), 2);
        assert_eq!(registry.devices(), ["a", "b"]);

        let err = registry.spawn("a").unwrap_err();
        assert!(matches!(err, IngestError::AlreadyRunning(d) if d == "a"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.shutdown().await.unwrap();

        let mut messages: Vec<String> = store
            .query(LogQuery::new(0, i64::MAX), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message)
            .collect();
        messages.sort();
        assert_eq!(messages, vec!["hello from a", "hello from b"]);

        store.close().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_no_devices() {
        let store = LogStore::open(":memory:").await.unwrap();
        let registry = IngestRegistry::new(EchoTransport::default(), store.clone());
        registry
            .shutdown_with_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        store.close().await;
    }
}
