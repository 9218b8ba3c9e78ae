//! Streaming query results.
//!
//! [`LogStream`] wraps the receiving half of a bounded channel fed by a
//! background scan task. It re-checks the query's cancellation token before
//! handing out every item, so once the token fires no further record is
//! delivered and the stream ends with [`StorageError::Cancelled`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_stream::StreamExt;
//!
//! let mut stream = store.query(LogQuery::last(Duration::from_secs(3600)), token);
//! while let Some(item) = stream.next().await {
//!     match item {
//!         Ok(record) => println!("{} {}", record.device, record.message),
//!         Err(e) if e.is_cancelled() => break,
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::storage::StorageError;
use crate::storage::types::LogRecord;

/// Lazy, single-pass stream of query results.
///
/// Implements `Stream<Item = Result<LogRecord, StorageError>>`. The stream
/// ends after the last matching record, after the first error, or after
/// yielding [`StorageError::Cancelled`].
///
/// Dropping the stream stops the background scan and releases its cursor and
/// the store's read lock.
pub struct LogStream {
    /// Channel from the scan task. `None` if the query never started.
    inner: Option<ReceiverStream<Result<LogRecord, StorageError>>>,
    /// Cancellation token shared with the scan task.
    cancel: CancellationToken,
    /// Whether the stream has terminated.
    terminated: bool,
}

impl LogStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<LogRecord, StorageError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Some(ReceiverStream::new(rx)),
            cancel,
            terminated: false,
        }
    }

    /// A stream for a query that was cancelled before it began.
    pub(crate) fn cancelled(cancel: CancellationToken) -> Self {
        Self {
            inner: None,
            cancel,
            terminated: false,
        }
    }

    /// Returns `true` if the stream has terminated.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Drain the stream into a vector.
    ///
    /// Returns the first error encountered, including cancellation.
    pub async fn try_collect_all(mut self) -> Result<Vec<LogRecord>, StorageError> {
        use tokio_stream::StreamExt;

        let mut records = Vec::new();
        while let Some(item) = self.next().await {
            records.push(item?);
        }
        Ok(records)
    }

    fn terminate(&mut self) {
        self.terminated = true;
        // Dropping the receiver makes the scan task's next send fail.
        self.inner = None;
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("terminated", &self.terminated)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Stream for LogStream {
    type Item = Result<LogRecord, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // All fields are Unpin.
        let this = self.get_mut();

        if this.terminated {
            return Poll::Ready(None);
        }

        if this.cancel.is_cancelled() {
            this.terminate();
            return Poll::Ready(Some(Err(StorageError::Cancelled)));
        }

        let Some(inner) = this.inner.as_mut() else {
            this.terminate();
            return Poll::Ready(None);
        };

        match Pin::new(inner).poll_next(cx) {
            Poll::Ready(Some(Ok(record))) => Poll::Ready(Some(Ok(record))),
            Poll::Ready(Some(Err(e))) => {
                this.terminate();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                // The scan task also exits on cancellation; report that
                // rather than a clean end.
                this.terminate();
                if this.cancel.is_cancelled() {
                    Poll::Ready(Some(Err(StorageError::Cancelled)))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn record(ts: i64) -> LogRecord {
        LogRecord::new(ts, "dev", format!("line {ts}"))
    }

    #[tokio::test]
    async fn test_stream_passes_records_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = LogStream::new(rx, CancellationToken::new());

        tx.send(Ok(record(2))).await.unwrap();
        tx.send(Ok(record(1))).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().unwrap().ts, 2);
        assert_eq!(stream.next().await.unwrap().unwrap().ts, 1);
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn test_pre_cancelled_stream_reports_cancellation_once() {
        let token = CancellationToken::new();
        token.cancel();
        let mut stream = LogStream::cancelled(token);

        assert!(stream.next().await.unwrap().unwrap_err().is_cancelled());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_withholds_buffered_records() {
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let mut stream = LogStream::new(rx, token.clone());

        for ts in [3, 2, 1] {
            tx.send(Ok(record(ts))).await.unwrap();
        }

        assert_eq!(stream.next().await.unwrap().unwrap().ts, 3);
        token.cancel();

        assert!(stream.next().await.unwrap().unwrap_err().is_cancelled());
        assert!(stream.next().await.is_none());
        // Receiver is gone, so the producer side observes closure.
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let (tx, rx) = mpsc::channel(4);
        let stream = LogStream::new(rx, CancellationToken::new());

        tx.send(Ok(record(1))).await.unwrap();
        tx.send(Err(StorageError::Internal("boom".into())))
            .await
            .unwrap();
        tx.send(Ok(record(0))).await.unwrap();

        let err = stream.try_collect_all().await.unwrap_err();
        assert!(matches!(err, StorageError::Internal(_)));
    }
}
