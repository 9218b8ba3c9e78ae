//! Per-device ingestion supervisor.
//!
//! Each supervisor drives a two-state machine until shutdown:
//!
//! - **Disconnected**: try to open the device. On success move to Connected,
//!   otherwise wait the retry interval and try again.
//! - **Connected**: read one line, stamp it and append it to the sink. On EOF
//!   or a read error, log the lost connection, wait the retry interval and
//!   move to Disconnected.
//!
//! A failed append is logged and reading continues. Shutdown is observed
//! while opening, reading, or backing off, never in the middle of an append.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::ingest::{DeviceTransport, IngestError};
use crate::storage::{LogRecord, RecordSink};

/// Delay between reconnect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Longest accepted line in bytes, excluding the `\n`. A device that
/// sends more without a newline is treated as a read error.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Connection state of one device.
enum State<R> {
    Disconnected,
    Connected(Session<R>),
}

/// An open device and its line reader.
struct Session<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> Session<R> {
    fn new(stream: R) -> Self {
        Self {
            reader: BufReader::new(stream),
            buf: Vec::new(),
        }
    }

    /// Read the next line without its terminator. `None` at end of stream.
    ///
    /// A trailing `\r` is stripped and invalid UTF-8 is replaced rather than
    /// treated as a read error. More than [`MAX_LINE_LEN`] bytes without a
    /// newline is an `InvalidData` read error.
    async fn next_line(&mut self) -> Result<Option<String>, IngestError> {
        self.buf.clear();
        let read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.len() > MAX_LINE_LEN && self.buf.last() != Some(&b'\n') {
            self.buf = Vec::new();
            return Err(IngestError::Read(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_LEN} bytes"),
            )));
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Keeps one device connected and feeds its lines into a [`RecordSink`].
pub struct Supervisor<T, S> {
    device: String,
    transport: T,
    sink: S,
    retry_interval: Duration,
}

impl<T, S> std::fmt::Debug for Supervisor<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("device", &self.device)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl<T: DeviceTransport, S: RecordSink> Supervisor<T, S> {
    /// Create a supervisor for `device`.
    pub fn new(device: impl Into<String>, transport: T, sink: S) -> Self {
        Self {
            device: device.into(),
            transport,
            sink,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set the reconnect delay.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Device this supervisor reads from.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// An append already in progress when `shutdown` fires runs to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::debug!(device = %self.device, "Supervisor started");

        let mut state = State::Disconnected;
        while let Some(next) = self.step(state, &shutdown).await {
            state = next;
        }

        tracing::debug!(device = %self.device, "Supervisor stopped");
    }

    /// Advance the state machine by one transition. `None` on shutdown.
    async fn step(
        &self,
        state: State<T::Stream>,
        shutdown: &CancellationToken,
    ) -> Option<State<T::Stream>> {
        match state {
            State::Disconnected => {
                let opened = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return None,
                    opened = self.connect() => opened,
                };
                match opened {
                    Ok(session) => {
                        tracing::info!(device = %self.device, "Connected");
                        Some(State::Connected(session))
                    }
                    Err(e) => {
                        tracing::debug!(device = %self.device, error = %e, "Unable to open device");
                        self.backoff(shutdown).await
                    }
                }
            }
            State::Connected(mut session) => {
                let line = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return None,
                    line = session.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        self.ingest(line).await;
                        Some(State::Connected(session))
                    }
                    Ok(None) => {
                        tracing::error!(device = %self.device, "Lost connection: end of stream");
                        self.backoff(shutdown).await
                    }
                    Err(e) => {
                        tracing::error!(device = %self.device, error = %e, "Lost connection");
                        self.backoff(shutdown).await
                    }
                }
            }
        }
    }

    async fn backoff(&self, shutdown: &CancellationToken) -> Option<State<T::Stream>> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            _ = tokio::time::sleep(self.retry_interval) => Some(State::Disconnected),
        }
    }

    async fn connect(&self) -> Result<Session<T::Stream>, IngestError> {
        let stream = self
            .transport
            .open(&self.device)
            .await
            .map_err(|source| IngestError::Open {
                device: self.device.clone(),
                source,
            })?;
        Ok(Session::new(stream))
    }

    async fn ingest(&self, line: String) {
        let record = LogRecord::now(self.device.as_str(), line);

        match self.sink.append(&record).await.map_err(IngestError::from) {
            Ok(()) => tracing::info!(device = %self.device, msg = %record.message),
            Err(e) => tracing::error!(
                device = %self.device,
                ts = record.ts,
                error = %e,
                "Failed to store record"
            ),
        }
    }
}
